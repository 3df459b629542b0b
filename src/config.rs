use envconfig::Envconfig;
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::Error;
use crate::policy::RateLimitConfig;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Shared counter store. Leave empty to run on the in-process
    /// store only.
    #[envconfig(from = "REDIS_URL", default = "")]
    pub redis_url: String,

    /// Timeout for a single Redis operation, in milliseconds
    #[envconfig(from = "REDIS_TIMEOUT_MS", default = "150")]
    pub redis_timeout_ms: u64,

    /// Default policy: maximum requests per window
    #[envconfig(from = "DEFAULT_LIMIT", default = "100")]
    pub default_limit: u64,

    /// Default policy: window length in seconds
    #[envconfig(from = "DEFAULT_WINDOW_SECS", default = "60")]
    pub default_window_secs: u64,

    /// How often the local store drops expired counters, in seconds
    #[envconfig(from = "SWEEP_INTERVAL_SECS", default = "60")]
    pub sweep_interval_secs: u64,

    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Reject degenerate settings at startup rather than letting them
    /// surface later as a panicking timer or a shared store that can
    /// never answer in time.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "SWEEP_INTERVAL_SECS must be greater than 0".into(),
            ));
        }
        if self.redis_timeout_ms == 0 {
            return Err(Error::Config(
                "REDIS_TIMEOUT_MS must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// The shared store URL, with "not configured" made explicit.
    pub fn redis_url(&self) -> Option<&str> {
        if self.redis_url.is_empty() {
            None
        } else {
            Some(&self.redis_url)
        }
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn default_policy(&self) -> crate::error::Result<RateLimitConfig> {
        RateLimitConfig::new(
            "default",
            self.default_limit,
            Duration::from_secs(self.default_window_secs),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            bind_addr: "127.0.0.1:3000".parse().unwrap(),
            redis_url: String::new(),
            redis_timeout_ms: 150,
            default_limit: 100,
            default_window_secs: 60,
            sweep_interval_secs: 60,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn accepts_sane_settings() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_zero_sweep_interval() {
        let config = Config {
            sweep_interval_secs: 0,
            ..base_config()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn rejects_zero_redis_timeout() {
        let config = Config {
            redis_timeout_ms: 0,
            ..base_config()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn empty_redis_url_means_not_configured() {
        assert!(base_config().redis_url().is_none());

        let config = Config {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            ..base_config()
        };
        assert_eq!(config.redis_url(), Some("redis://127.0.0.1:6379"));
    }
}
