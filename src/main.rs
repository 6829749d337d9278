//! chat-relay: WebSocket relay between chat clients and an external processor.
//!
//! Usage:
//!   chat-relay --processor-url https://processor.example/webhook/trigger [--port 3001]
//!
//! Every option can also be set through the environment (see `--help`);
//! a `.env` file in the working directory is loaded first.

use anyhow::Result;
use chat_relay::config::RelayConfig;
use chat_relay::gateway::server;
use chat_relay::logging::init_logging;
use chat_relay::Args;
use clap::Parser;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(args.log_format)?;

    let config = RelayConfig::from_args(&args)?;
    info!(
        port = config.port,
        upload_dir = %config.upload_dir.display(),
        timeout_secs = config.relay_timeout.as_secs(),
        "chat-relay starting"
    );

    server::run(config, shutdown_signal()).await?;
    info!("server closed");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
