//! Log subscriber setup.
//!
//! The engine itself only emits `tracing` spans and events. Binaries and
//! demos that have no subscriber of their own can call [`init_logging`].

use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` wins over `config.level`. Calling this more than once, or
/// after the host application installed its own subscriber, is a no-op.
pub fn init_logging(config: &LoggingConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&config.level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let layer = if config.json {
            fmt::layer()
                .with_target(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer().with_target(true).with_filter(filter).boxed()
        };

        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("global tracing subscriber already set; keeping it");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        let config = LoggingConfig::default();
        init_logging(&config);
        init_logging(&LoggingConfig {
            level: "debug".to_string(),
            json: true,
        });
        assert!(LOGGER_INITIALIZED.get().is_some());
    }
}
