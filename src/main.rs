//! tcpread: run the TCP trigger standalone with built-in handlers.
//!
//! Configuration via CLI arguments or TOML file. Runs until Ctrl-C.

use tcpread::config::Config;
use tcpread::{InitContext, TcpTrigger};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        network = %config.listener.network,
        host = %config.listener.host,
        port = %config.listener.port,
        timeout_ms = config.listener.timeout_ms,
        handlers = ?config.handlers,
        "Starting tcpread"
    );

    let handlers = config.handlers.iter().map(|kind| kind.build()).collect();
    let mut trigger = TcpTrigger::new(config.listener);
    trigger.initialize(InitContext::new(handlers))?;
    trigger.start()?;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    trigger.stop()?;
    Ok(())
}
