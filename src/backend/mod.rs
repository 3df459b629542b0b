//! Counter backends.
//!
//! Both the shared Redis store and the in-process fallback implement the
//! same increment-and-read contract, so the decision engine can treat
//! them interchangeably.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;

/// One counter observation: the count after this call's increment and
/// the absolute time (epoch milliseconds) at which the window expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    pub count: u64,
    pub reset_at_ms: u64,
}

/// Increment-and-read over an expiring counter keyed by string.
///
/// The first call for a fresh key returns `count == 1` and fixes the
/// window boundary; later calls within the window return strictly
/// larger counts and the same `reset_at_ms`. The boundary is decided
/// once, by whichever call creates the key, and is never slid forward
/// by subsequent hits.
#[async_trait]
pub trait CounterBackend: Send + Sync {
    async fn increment_and_get(&self, key: &str, window_ms: u64) -> Result<WindowCounter>;

    /// Liveness probe, used by health reporting only.
    async fn ping(&self) -> Result<()>;
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
