//! Tracing subscriber setup shared by the binaries

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = fmt().with_env_filter(filter).with_target(true);

    // A second init (tests, embedded use) keeps the first subscriber
    let result = if config.json_logging {
        builder.json().try_init()
    } else {
        builder.pretty().try_init()
    };

    if result.is_ok() {
        tracing::info!(service = %config.service_name, "Tracing initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        let config = ObservabilityConfig {
            json_logging: false,
            log_level: "not a level ===".to_string(),
            ..ObservabilityConfig::default()
        };
        init_tracing(&config);
        init_tracing(&config);
    }
}
