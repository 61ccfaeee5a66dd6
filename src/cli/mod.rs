//! Command-line interface for parascan.
//!
//! Provides commands to run a scan, resume an interrupted one and inspect a
//! scan store.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
