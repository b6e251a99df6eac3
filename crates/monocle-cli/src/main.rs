//! Monocle CLI entry point

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info};

use monocle_ble::BtleTransport;
use monocle_cli::{AppConfig, Cli, CommandContext, CommandDispatcher, ConsoleSink};
use monocle_core::DeviceSession;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let cli = Cli::parse();

    // Initialize logging
    setup_logging(cli.verbose);

    // Load configuration
    let config = AppConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let transport = Arc::new(BtleTransport::with_config(config.ble.clone()));
    let sink = Arc::new(ConsoleSink::new());
    let session = DeviceSession::builder(transport, sink.clone())
        .config(config.session.clone())
        .build()
        .context("Failed to create device session")?;

    let ctx = CommandContext {
        session,
        sink,
        config,
    };

    // Execute the command
    if let Err(e) = CommandDispatcher::execute(cli.command, &ctx).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    info!("Done");
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
