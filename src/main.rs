//! parascan CLI entry point.
//!
//! Initializes logging and delegates to the CLI module for command handling.

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments first to get log_level
    let cli = parascan::cli::parse_cli();

    // Priority: RUST_LOG env var > --log-level CLI arg > default "info"
    parascan::logging::init_tracing(&cli.log_level);

    parascan::cli::run_with_cli(cli).await
}
