//! Tracing subscriber initialisation

use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// `[logging]` config section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

/// Install the global fmt subscriber
///
/// `RUST_LOG` wins over the configured level. Calling this twice is harmless:
/// the second call reports that a subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| crate::Error::Config(format!("Invalid log level '{}': {}", config.level, e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| crate::Error::Internal(format!("Tracing already initialised: {}", e)))
}
