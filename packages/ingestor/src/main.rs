use tracing::{Level, error};

use ingestor::config::IngestorConfig;
use ingestor::supervisor;

/// Exit codes: 0 clean shutdown, 1 fatal configuration error, 2
/// unrecoverable platform auth failure.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = match IngestorConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    match supervisor::run(config).await {
        Ok(()) => {}
        Err(e) if matches!(e, ingestor::error::IngestError::Auth(_)) => {
            error!(error = %e, "platform authentication failed");
            std::process::exit(2);
        }
        Err(e) => {
            error!(error = %e, error_class = e.class(), "fatal error");
            std::process::exit(1);
        }
    }
}
