//! Process-local counter store.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{now_ms, CounterBackend, WindowCounter};
use crate::error::Result;

/// Counter state for one key within one window.
#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    reset_at_ms: u64,
}

/// In-process fallback store.
///
/// Gives each process instance its own budget when the shared store is
/// not configured or unreachable. An entry whose `reset_at_ms` has
/// passed is treated as absent whether or not the sweeper has removed
/// it yet, so sweeping never influences decisions.
pub struct LocalMemoryBackend {
    entries: Mutex<HashMap<String, CounterEntry>>,
}

impl LocalMemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Increment the counter for `key`, starting a fresh window if none
    /// is live. Infallible; the check-then-act on entry liveness runs
    /// under the map lock.
    pub fn increment(&self, key: &str, window_ms: u64) -> WindowCounter {
        self.increment_at(key, window_ms, now_ms())
    }

    fn increment_at(&self, key: &str, window_ms: u64, now: u64) -> WindowCounter {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(key) {
            Some(entry) if now < entry.reset_at_ms => {
                entry.count += 1;
                WindowCounter {
                    count: entry.count,
                    reset_at_ms: entry.reset_at_ms,
                }
            }
            _ => {
                let entry = CounterEntry {
                    count: 1,
                    reset_at_ms: now + window_ms,
                };
                entries.insert(key.to_string(), entry);
                WindowCounter {
                    count: 1,
                    reset_at_ms: entry.reset_at_ms,
                }
            }
        }
    }

    /// Drop entries whose window has already passed and return how many
    /// were removed. Bounds memory only; liveness checks on the read
    /// path do not depend on it.
    pub fn sweep_expired(&self) -> usize {
        let now = now_ms();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| now < entry.reset_at_ms);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterBackend for LocalMemoryBackend {
    async fn increment_and_get(&self, key: &str, window_ms: u64) -> Result<WindowCounter> {
        Ok(self.increment(key, window_ms))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW_MS: u64 = 60_000;

    #[test]
    fn counts_are_monotonic_within_a_window() {
        let backend = LocalMemoryBackend::new();
        for expected in 1..=5 {
            let counter = backend.increment_at("ip-a", WINDOW_MS, 1_000);
            assert_eq!(counter.count, expected);
        }
    }

    #[test]
    fn reset_is_fixed_by_the_window_creating_call() {
        let backend = LocalMemoryBackend::new();
        let first = backend.increment_at("ip-a", WINDOW_MS, 1_000);
        assert_eq!(first.reset_at_ms, 61_000);

        // Later hits inside the window must not push the boundary back.
        let second = backend.increment_at("ip-a", WINDOW_MS, 30_000);
        assert_eq!(second.reset_at_ms, first.reset_at_ms);
    }

    #[test]
    fn expired_entry_starts_a_new_window() {
        let backend = LocalMemoryBackend::new();
        let first = backend.increment_at("ip-a", WINDOW_MS, 1_000);
        backend.increment_at("ip-a", WINDOW_MS, 2_000);

        // Exactly at the boundary the old window is over.
        let rolled = backend.increment_at("ip-a", WINDOW_MS, first.reset_at_ms);
        assert_eq!(rolled.count, 1);
        assert_eq!(rolled.reset_at_ms, first.reset_at_ms + WINDOW_MS);
    }

    #[test]
    fn unswept_expired_entry_is_still_treated_as_absent() {
        let backend = LocalMemoryBackend::new();
        backend.increment_at("ip-a", WINDOW_MS, 1_000);
        assert_eq!(backend.len(), 1);

        // No sweep has run, yet a post-expiry call gets a fresh window.
        let counter = backend.increment_at("ip-a", WINDOW_MS, 100_000);
        assert_eq!(counter.count, 1);
    }

    #[test]
    fn keys_do_not_share_counters() {
        let backend = LocalMemoryBackend::new();
        backend.increment_at("ip-a", WINDOW_MS, 1_000);
        backend.increment_at("ip-a", WINDOW_MS, 1_000);
        let other = backend.increment_at("ip-b", WINDOW_MS, 1_000);
        assert_eq!(other.count, 1);
    }

    #[test]
    fn sweep_removes_only_expired_entries() {
        let backend = LocalMemoryBackend::new();
        let now = now_ms();
        backend.increment_at("old", 1, now.saturating_sub(10));
        backend.increment_at("live", WINDOW_MS, now);

        let removed = backend.sweep_expired();
        assert_eq!(removed, 1);
        assert_eq!(backend.len(), 1);

        // The surviving entry keeps counting where it left off.
        let counter = backend.increment_at("live", WINDOW_MS, now + 1);
        assert_eq!(counter.count, 2);
    }
}
