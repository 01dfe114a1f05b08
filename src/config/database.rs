use secrecy::{ExposeSecret, SecretString};

use crate::config::helpers::{parse_optional_env, require_env};
use crate::error::ConfigError;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    pub url: SecretString,
    /// Connection pool size.
    pub pool_size: usize,
}

impl DatabaseConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let url = require_env(
            "DATABASE_URL",
            "Set DATABASE_URL to a PostgreSQL connection string",
        )?;
        let pool_size = parse_optional_env("DATABASE_POOL_SIZE", 10)?;

        Ok(Self {
            url: SecretString::from(url),
            pool_size,
        })
    }

    /// Get the database URL (exposes the secret).
    pub fn url(&self) -> &str {
        self.url.expose_secret()
    }
}
