//! Chat relay: serves the static client and fans every message out to the
//! other connected participants.

use std::process::ExitCode;

use tracing::{error, info, warn};

use wsrelay::config::RelayConfig;
use wsrelay::context::RelayContext;
use wsrelay::logging;
use wsrelay::relay::RelayServer;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match RelayConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("relay: {e}");
            return ExitCode::FAILURE;
        }
    };
    logging::init(&config.log_level);

    let context = RelayContext::new(config);
    let server = match RelayServer::bind(context.clone()).await {
        Ok(server) => server,
        Err(e) => {
            error!(address = %context.config().listen_addr(), error = %e, "failed to bind");
            return ExitCode::FAILURE;
        }
    };

    let signal_context = context.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("interrupt received, shutting down"),
            Err(e) => warn!(error = %e, "cannot listen for interrupt, shutting down"),
        }
        signal_context.shutdown();
    });

    if let Err(e) = server.run().await {
        error!(error = %e, "relay failed");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
