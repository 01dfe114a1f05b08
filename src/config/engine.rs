use std::time::Duration;

use crate::config::helpers::parse_optional_env;
use crate::error::ConfigError;

/// Configuration for the job progress ticker.
#[derive(Debug, Clone)]
pub struct TickerConfig {
    /// Interval between ticks.
    pub interval: Duration,
    /// Budget for a single tick; work left over is retried next tick.
    pub tick_budget: Duration,
    /// Whether the ticker runs at all.
    pub enabled: bool,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            tick_budget: Duration::from_secs(30),
            enabled: true,
        }
    }
}

impl TickerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            interval: Duration::from_secs(parse_optional_env(
                "TICKER_INTERVAL_SECS",
                defaults.interval.as_secs(),
            )?),
            tick_budget: Duration::from_secs(parse_optional_env(
                "TICKER_BUDGET_SECS",
                defaults.tick_budget.as_secs(),
            )?),
            enabled: parse_optional_env("TICKER_ENABLED", true)?,
        })
    }

    /// Create a config with a specific interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Disable the ticker.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Configuration for the investment scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval of the defensive sweep for matured-but-unprocessed rows.
    pub cleanup_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: Duration::from_secs(6 * 60 * 60),
        }
    }
}

impl SchedulerConfig {
    pub(crate) fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            cleanup_interval: Duration::from_secs(parse_optional_env(
                "SCHEDULER_CLEANUP_SECS",
                defaults.cleanup_interval.as_secs(),
            )?),
        })
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_config_defaults() {
        let config = TickerConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.tick_budget, Duration::from_secs(30));
    }

    #[test]
    fn test_ticker_config_builders() {
        let config = TickerConfig::default().with_interval(Duration::from_secs(1));
        assert_eq!(config.interval, Duration::from_secs(1));
        assert!(!TickerConfig::default().disabled().enabled);
    }

    #[test]
    fn test_scheduler_config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.cleanup_interval, Duration::from_secs(21_600));
    }
}
