//! Shared counter store backed by Redis.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

use super::{now_ms, CounterBackend, WindowCounter};
use crate::error::{Error, Result};

/// Increment the counter, let the creating call set the TTL, and read
/// the TTL back, all in one script so concurrent callers cannot
/// interleave between the increment and the conditional expire. Only
/// the call that sees the count transition to 1 sets the expiry; every
/// other call observes the boundary that call fixed.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
return {count, ttl}
"#;

/// Atomic counter store shared by every process instance.
///
/// The multiplexed connection is cached and dropped on the first
/// failed operation, so the next call dials again. Every operation
/// carries a short timeout; a slow store reads as unavailable rather
/// than delaying the request being limited.
#[derive(Debug)]
pub struct RedisBackend {
    client: Client,
    connection: Mutex<Option<MultiplexedConnection>>,
    script: Script,
    op_timeout: Duration,
}

impl RedisBackend {
    pub fn new(url: &str, op_timeout: Duration) -> Result<Self> {
        let client =
            Client::open(url).map_err(|e| Error::Config(format!("invalid Redis URL: {e}")))?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            script: Script::new(INCREMENT_SCRIPT),
            op_timeout,
        })
    }

    async fn connection(&self) -> Result<MultiplexedConnection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = timeout(self.op_timeout, self.client.get_multiplexed_tokio_connection())
            .await
            .map_err(|_| Error::BackendUnavailable("timed out connecting to Redis".into()))??;
        debug!("connected to Redis counter store");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn invalidate(&self) {
        *self.connection.lock().await = None;
    }
}

#[async_trait]
impl CounterBackend for RedisBackend {
    async fn increment_and_get(&self, key: &str, window_ms: u64) -> Result<WindowCounter> {
        let mut conn = self.connection().await?;

        let result = timeout(
            self.op_timeout,
            self.script
                .key(key)
                .arg(window_ms)
                .invoke_async::<_, (u64, i64)>(&mut conn),
        )
        .await
        .map_err(|_| Error::BackendUnavailable("counter increment timed out".into()))
        .and_then(|inner| inner.map_err(Error::from));

        let (count, ttl_ms) = match result {
            Ok(values) => values,
            Err(e) => {
                self.invalidate().await;
                return Err(e);
            }
        };

        // PTTL is negative only if the key somehow lost its expiry, in
        // which case a full window from now is the safe reading.
        let reset_at_ms = if ttl_ms >= 0 {
            now_ms() + ttl_ms as u64
        } else {
            now_ms() + window_ms
        };

        Ok(WindowCounter { count, reset_at_ms })
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let result = timeout(
            self.op_timeout,
            redis::cmd("PING").query_async::<_, String>(&mut conn),
        )
        .await
        .map_err(|_| Error::BackendUnavailable("PING timed out".into()))
        .and_then(|inner| inner.map_err(Error::from));

        if let Err(e) = result {
            self.invalidate().await;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_url_at_construction() {
        let err = RedisBackend::new("not-a-url", Duration::from_millis(150)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn unreachable_store_reads_as_unavailable() {
        // Reserved TEST-NET-1 address; nothing listens there.
        let backend =
            RedisBackend::new("redis://192.0.2.1:6379", Duration::from_millis(50)).unwrap();
        let err = backend
            .increment_and_get("limitgate:test:ip-a", 60_000)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
    }
}
