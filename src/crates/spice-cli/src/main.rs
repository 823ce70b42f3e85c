//! # spice-cli
//!
//! Demo harness for `spice-core`: runs the three bundled demo graphs
//! (`approval`, `free-text`, `decision`) end to end against the in-memory
//! checkpoint store, printing each pause/resume step to stdout. This is
//! demonstration scaffolding, not a product surface — no tenancy, no auth,
//! no persistence beyond the process.

use clap::{Parser, Subcommand};
use spice_cli::demo;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spice")]
#[command(about = "spice CLI - run the bundled demo graphs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HITL approval demo: draft -> review(approve/reject) -> publish/rejected.
    Approval {
        /// "approve" or "reject"
        #[arg(short, long, default_value = "approve")]
        decision: String,
    },

    /// Run the free-text HITL demo: ask a question, fold the human's answer into the output.
    FreeText {
        /// The human's response text
        #[arg(short, long, default_value = "Looks good to me")]
        response: String,
    },

    /// Run the decision-routing demo: a fixed decision engine routes to yes/no/default.
    Decision {
        /// "YES", "NO", or anything else to hit the fallback
        #[arg(short, long, default_value = "YES")]
        outcome: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Approval { decision } => demo::approval::run(&decision).await?,
        Commands::FreeText { response } => demo::free_text::run(&response).await?,
        Commands::Decision { outcome } => demo::decision::run(&outcome).await?,
    }

    Ok(())
}
