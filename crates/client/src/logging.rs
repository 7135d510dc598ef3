//! Tracing subscriber setup.
//!
//! Library code logs through `tracing` macros; binaries call [`init_tracing`]
//! once at startup. `RUST_LOG` wins over the configured level.

use tracing_subscriber::EnvFilter;

use crate::config::ClientConfig;

pub fn init_tracing(config: &ClientConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if config.is_production() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .try_init()
    };

    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
