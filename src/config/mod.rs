//! Environment-driven configuration.
//!
//! Each area resolves its own struct from the process environment; the
//! aggregate [`Config`] pulls them together at startup. `.env` loading
//! happens in `main` via dotenvy before `Config::from_env` runs.

mod database;
mod engine;
pub(crate) mod helpers;

pub use database::DatabaseConfig;
pub use engine::{SchedulerConfig, TickerConfig};

use crate::error::ConfigError;

/// Aggregate service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub ticker: TickerConfig,
    pub scheduler: SchedulerConfig,
}

impl Config {
    /// Resolve the full configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database: DatabaseConfig::resolve()?,
            ticker: TickerConfig::resolve()?,
            scheduler: SchedulerConfig::resolve()?,
        })
    }
}
