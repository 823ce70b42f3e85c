//! Channel configuration: what a channel is called, what event type/version
//! it carries, how many in-flight envelopes its topic buffers, and whether a
//! deserialization failure on it goes to the DLQ.

/// Configuration recorded when a channel is created via
/// [`crate::bus::EventBus::channel`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub name: String,
    pub event_type: String,
    pub schema_version: String,
    /// Topic buffer capacity — also this channel's "history" bound: a late
    /// subscriber sees at most this many of the most recent envelopes.
    pub history: usize,
    pub enable_dlq: bool,
}

impl ChannelConfig {
    pub fn new(
        name: impl Into<String>,
        event_type: impl Into<String>,
        schema_version: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            event_type: event_type.into(),
            schema_version: schema_version.into(),
            history: 1000,
            enable_dlq: true,
        }
    }

    pub fn with_history(mut self, history: usize) -> Self {
        self.history = history;
        self
    }

    pub fn without_dlq(mut self) -> Self {
        self.enable_dlq = false;
        self
    }
}

/// The graph runner's lifecycle events: Started/Completed/Failed/Paused.
pub const GRAPH_LIFECYCLE_CHANNEL: &str = "spice.graph.lifecycle";
/// Per-node start/finish events. No history — strictly fire-and-forget.
pub const NODE_LIFECYCLE_CHANNEL: &str = "spice.node.lifecycle";
/// Every tool call issued by any node, across all runs.
pub const TOOLCALLS_CHANNEL: &str = "spice.toolcalls";
/// Bus-internal operational events (channel created, backend closed, ...).
pub const SYSTEM_CHANNEL: &str = "spice.system";

/// The four predefined channels named in the event-bus design, with the
/// history sizes and DLQ policy called out there.
pub fn standard_channel_configs() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig::new(GRAPH_LIFECYCLE_CHANNEL, "GraphLifecycleEvent", "1.0.0").with_history(1000),
        ChannelConfig::new(NODE_LIFECYCLE_CHANNEL, "NodeLifecycleEvent", "1.0.0").with_history(1),
        ChannelConfig::new(TOOLCALLS_CHANNEL, "ToolCallEvent", "1.0.0").with_history(10_000),
        ChannelConfig::new(SYSTEM_CHANNEL, "SystemEvent", "1.0.0")
            .with_history(5_000)
            .without_dlq(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_channels_match_documented_history_and_dlq_policy() {
        let configs = standard_channel_configs();
        let system = configs.iter().find(|c| c.name == SYSTEM_CHANNEL).unwrap();
        assert_eq!(system.history, 5_000);
        assert!(!system.enable_dlq);

        let toolcalls = configs.iter().find(|c| c.name == TOOLCALLS_CHANNEL).unwrap();
        assert_eq!(toolcalls.history, 10_000);
        assert!(toolcalls.enable_dlq);
    }
}
