//! Logging setup for binaries and tests that embed the installer.
//!
//! The library itself only emits `log` records and `tracing` spans; nothing
//! is printed unless the embedder installs a subscriber, for example with
//! [`init_logging`].

use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Installs a global subscriber with a human-readable format. `RUST_LOG`
/// wins over `default_filter`. Returns false if a subscriber was already
/// installed.
pub fn init_logging(default_filter: &str) -> bool {
    init_logging_with(default_filter, LogFormat::Text)
}

pub fn init_logging_with(default_filter: &str, format: LogFormat) -> bool {
    // Bridge `log` records into tracing; fails harmlessly if a logger exists.
    let _ = tracing_log::LogTracer::init();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Text => {
            set_global_default(registry.with(tracing_subscriber::fmt::layer().with_target(true)))
        }
        LogFormat::Json => {
            set_global_default(registry.with(tracing_subscriber::fmt::layer().json()))
        }
    };
    result.is_ok()
}
