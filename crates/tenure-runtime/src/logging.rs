//! Subscriber setup

use tracing_subscriber::EnvFilter;

use tenure_core::{LogConfig, TenureError, TenureResult};

/// Install the global `tracing` subscriber described by `config`.
///
/// Fails if the filter directive does not parse or a subscriber is already
/// installed.
pub fn init_logging(config: &LogConfig) -> TenureResult<()> {
    let filter = EnvFilter::try_new(&config.filter)
        .map_err(|e| TenureError::InvalidConfig(format!("log filter: {}", e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| TenureError::InvalidConfig(format!("log subscriber: {}", e)))
}
