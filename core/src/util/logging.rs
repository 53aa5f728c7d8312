use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install a stderr fmt subscriber filtered by `RUST_LOG` or `logging.level`.
///
/// Returns `Ok(false)` when logging is disabled or a global subscriber was
/// already installed (tests and embedding applications commonly do this).
pub fn init_tracing(logging: &LoggingConfig) -> Result<bool, String> {
    if !logging.enabled {
        return Ok(false);
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_thread_names(true);

    Ok(tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .try_init()
        .is_ok())
}
