//! Logger setup
//!
//! A log4rs file wins when present; its patterns can print the
//! `request_id` and `attempt` MDC keys the orchestrator sets. Without one,
//! env_logger is installed at the configured level.

use log::info;
use std::path::Path;

use crate::config::LoggingConfig;
use crate::error::{ClientError, Result};

/// Install the global logger. A second call reports a Config error.
pub fn init(config: &LoggingConfig) -> Result<()> {
    if Path::new(&config.config_file).exists() {
        log4rs::init_file(&config.config_file, Default::default())
            .map_err(|e| ClientError::Config(format!("log4rs init from {}: {}", config.config_file, e)))?;
        info!("Logging configured from {}", config.config_file);
    } else {
        env_logger::Builder::new()
            .parse_filters(&config.level)
            .try_init()
            .map_err(|e| ClientError::Config(format!("logger already installed: {}", e)))?;
        info!("Logging at level {}", config.level);
    }
    Ok(())
}
