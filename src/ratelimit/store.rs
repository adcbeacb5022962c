// ABOUTME: Counter backends for the fixed-window rate limiter: Redis and in-process memory
// ABOUTME: Both expose INCR/EXPIRE/GET/SCAN/DEL with identical semantics

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Key-value counter operations the limiter needs
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment and return the new value; a missing key starts at 0
    async fn incr(&self, key: &str) -> Result<i64>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Keys matching a glob pattern where `*` matches any run of characters
    async fn scan(&self, pattern: &str) -> Result<Vec<String>>;

    async fn del(&self, key: &str) -> Result<()>;
}

pub struct RedisCounterStore {
    connection_manager: redis::aio::ConnectionManager,
}

impl RedisCounterStore {
    pub async fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| {
            GatewayError::RateLimitStore(format!("Failed to create Redis client: {e}"))
        })?;
        let connection_manager = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| {
                GatewayError::RateLimitStore(format!(
                    "Failed to create Redis connection manager: {e}"
                ))
            })?;
        Ok(Self { connection_manager })
    }

    pub fn from_manager(connection_manager: redis::aio::ConnectionManager) -> Self {
        Self { connection_manager }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection_manager.clone();
        let count: i64 = redis::cmd("INCR").arg(key).query_async(&mut conn).await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let _: i64 = redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.connection_manager.clone();
        let value: Option<i64> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.connection_manager.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(keys)
    }

    async fn del(&self, key: &str) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }
}

struct Counter {
    value: i64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Minimum gap between two sweeps of expired counters
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Counters {
    entries: HashMap<String, Counter>,
    last_sweep: Option<Instant>,
}

impl Counters {
    /// Drop expired counters, at most once per `SWEEP_INTERVAL`
    fn sweep(&mut self, now: Instant) {
        if self
            .last_sweep
            .is_some_and(|at| now.saturating_duration_since(at) < SWEEP_INTERVAL)
        {
            return;
        }
        self.entries.retain(|_, c| !c.is_expired(now));
        self.last_sweep = Some(now);
    }
}

/// In-process store for tests and single-node deployments.
///
/// Expired counters are swept out as new ones are incremented.
#[derive(Default)]
pub struct MemoryCounterStore {
    counters: Mutex<Counters>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.counters
            .lock()
            .entries
            .values()
            .filter(|c| !c.is_expired(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remaining time to live of a key, if it has one
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.counters
            .lock()
            .entries
            .get(key)
            .and_then(|c| c.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn incr(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        counters.sweep(now);
        let counter = counters.entries.entry(key.to_string()).or_insert(Counter {
            value: 0,
            expires_at: None,
        });
        if counter.is_expired(now) {
            counter.value = 0;
            counter.expires_at = None;
        }
        counter.value += 1;
        Ok(counter.value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        if let Some(counter) = self.counters.lock().entries.get_mut(key) {
            counter.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let now = Instant::now();
        Ok(self
            .counters
            .lock()
            .entries
            .get(key)
            .filter(|c| !c.is_expired(now))
            .map(|c| c.value))
    }

    async fn scan(&self, pattern: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        counters.entries.retain(|_, c| !c.is_expired(now));
        counters.last_sweep = Some(now);
        Ok(counters
            .entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.counters.lock().entries.remove(key);
        Ok(())
    }
}

/// Glob match supporting only `*`
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let mut parts = pattern.split('*');
    let Some(first) = parts.next() else {
        return text.is_empty();
    };
    let Some(mut rest) = text.strip_prefix(first) else {
        return false;
    };

    let parts: Vec<&str> = parts.collect();
    let Some((last, middle)) = parts.split_last() else {
        // No `*` at all: exact match
        return rest.is_empty();
    };

    for part in middle {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    rest.len() >= last.len() && rest.ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("rate:vendor:v1:*", "rate:vendor:v1:1700000000"));
        assert!(!glob_match("rate:vendor:v1:*", "rate:vendor:v10:1700000000"));
        assert!(glob_match("*", "anything"));
        assert!(glob_match("a*c*e", "abcde"));
        assert!(!glob_match("a*c*e", "abcdf"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "exact2"));
    }

    #[tokio::test]
    async fn test_memory_incr_and_get() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.incr("k").await.unwrap(), 1);
        assert_eq!(store.incr("k").await.unwrap(), 2);
        assert_eq!(store.get("k").await.unwrap(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_expiry() {
        let store = MemoryCounterStore::new();
        store.incr("k").await.unwrap();
        store.expire("k", Duration::from_secs(1)).await.unwrap();
        assert!(store.ttl("k").is_some());

        tokio::time::advance(Duration::from_millis(1500)).await;

        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.incr("k").await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_memory_incr_sweeps_expired_counters() {
        let store = MemoryCounterStore::new();
        for window in 0..50 {
            let key = format!("rate:vendor:v1:{window}");
            store.incr(&key).await.unwrap();
            store.expire(&key, Duration::from_secs(1)).await.unwrap();
            tokio::time::advance(Duration::from_secs(2)).await;
        }

        store.incr("rate:vendor:v1:50").await.unwrap();
        assert_eq!(store.counters.lock().entries.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_scan_and_del() {
        let store = MemoryCounterStore::new();
        store.incr("rate:vendor:a:1").await.unwrap();
        store.incr("rate:vendor:a:2").await.unwrap();
        store.incr("rate:vendor:b:1").await.unwrap();

        let mut keys = store.scan("rate:vendor:a:*").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["rate:vendor:a:1", "rate:vendor:a:2"]);

        for key in keys {
            store.del(&key).await.unwrap();
        }
        assert_eq!(store.len(), 1);
    }
}
