//! Tracing subscriber setup.
//!
//! Logs always go to stderr so they never interleave with followed output on
//! stdout. `RUST_LOG` takes precedence over the configured level.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{GeneralConfig, LogFormat};

/// Build the filter from `RUST_LOG`, falling back to `default_level`.
#[must_use]
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Returns `false` if one was already set
/// (tests, or an embedding host that owns logging).
pub fn init_logging(config: &GeneralConfig) -> bool {
    let filter = env_filter(&config.log_level);
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.log_format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };

    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_level_falls_back() {
        // Must not panic on garbage input.
        let _ = env_filter("definitely[not a filter");
    }

    #[test]
    fn second_init_reports_already_installed() {
        let config = GeneralConfig::default();
        let _ = init_logging(&config);
        assert!(!init_logging(&config));
    }
}
