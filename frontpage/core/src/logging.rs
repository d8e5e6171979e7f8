//! Logging Setup
//!
//! Installs a `tracing-subscriber` fmt subscriber. The filter comes from
//! `FRONTPAGE_LOG`, then `RUST_LOG`, then the caller's default (usually
//! [`FrontpageConfig::log_filter`](crate::config::FrontpageConfig::log_filter)).

use tracing_subscriber::EnvFilter;

/// Environment variable read before `RUST_LOG`
pub const LOG_ENV_VAR: &str = "FRONTPAGE_LOG";

/// Resolve the filter directive without installing anything
pub fn build_filter(default_filter: &str) -> EnvFilter {
    std::env::var(LOG_ENV_VAR)
        .ok()
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .or_else(|| EnvFilter::try_new(default_filter).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install the global subscriber
///
/// Returns `false` if a subscriber was already installed (tests, embedding
/// applications); calling this more than once is harmless.
pub fn init_tracing(default_filter: &str) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(build_filter(default_filter))
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!("Tracing initialised");
    }
    installed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init_tracing("frontpage_core=debug");
        assert!(!init_tracing("frontpage_core=debug"));
    }

    #[test]
    fn test_invalid_default_falls_back() {
        // An unparseable default must not panic
        let _filter = build_filter("frontpage_core=[");
    }
}
