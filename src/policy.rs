use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};

/// A fixed-window rate limit policy: at most `limit` requests per
/// `window` for a given identifier.
///
/// The `name` namespaces counter keys, so two policies applied to the
/// same identifier (say a contact-form policy and a data-fetch policy)
/// keep independent budgets. Call sites that must not share a budget
/// must use distinct names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub name: String,
    pub limit: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl RateLimitConfig {
    /// Build a policy, rejecting degenerate parameters up front so the
    /// per-request path never has to handle them.
    pub fn new(name: impl Into<String>, limit: u64, window: Duration) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidPolicy("policy name must not be empty".into()));
        }
        if limit == 0 {
            return Err(Error::InvalidPolicy("limit must be greater than 0".into()));
        }
        if window < Duration::from_secs(1) {
            return Err(Error::InvalidPolicy(
                "window must be at least one second".into(),
            ));
        }
        Ok(Self { name, limit, window })
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}
