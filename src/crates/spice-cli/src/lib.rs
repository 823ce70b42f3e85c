//! Library half of `spice-cli`: the demo graphs live here so
//! `tests/cli_tests.rs` can exercise them directly instead of shelling out to
//! the built binary.

pub mod demo;
