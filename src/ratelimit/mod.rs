// ABOUTME: Fixed-window rate limiting for customers, vendors and 10DLC source numbers
// ABOUTME: Each check is INCR on a window-stamped key plus EXPIRE when the window opens

mod store;

pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore};

use crate::error::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const VENDOR_WINDOW: Duration = Duration::from_secs(1);
const CUSTOMER_WINDOW: Duration = Duration::from_secs(60);
const HOUR_WINDOW: Duration = Duration::from_secs(3600);
const DAY_WINDOW: Duration = Duration::from_secs(86400);

/// Time source for window keys
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Per-second ceiling for a vendor. Returns (allowed, remaining).
    ///
    /// A non-positive limit means unlimited and touches no counter.
    pub async fn check_vendor_limit(&self, vendor_id: &str, limit: i64) -> Result<(bool, i64)> {
        if limit <= 0 {
            return Ok((true, 0));
        }
        let key = format!("rate:vendor:{}:{}", vendor_id, self.clock.now().timestamp());
        self.check(&key, limit, VENDOR_WINDOW).await
    }

    /// Per-minute ceiling for a customer. Returns (allowed, remaining).
    pub async fn check_customer_limit(
        &self,
        customer_id: &str,
        limit_per_min: i64,
    ) -> Result<(bool, i64)> {
        if limit_per_min <= 0 {
            return Ok((true, 0));
        }
        let minute = self.clock.now().timestamp() / 60;
        let key = format!("rate:customer:{customer_id}:{minute}");
        self.check(&key, limit_per_min, CUSTOMER_WINDOW).await
    }

    /// Hourly and daily caps for a 10DLC source number.
    ///
    /// The daily counter is not touched when the hourly cap already rejects.
    pub async fn check_10dlc_limit(
        &self,
        source_addr: &str,
        hourly_limit: i64,
        daily_limit: i64,
    ) -> Result<bool> {
        let now = self.clock.now();

        let hour_key = format!("rate:10dlc:hour:{}:{}", source_addr, now.format("%Y%m%d%H"));
        let (allowed, _) = self.check(&hour_key, hourly_limit, HOUR_WINDOW).await?;
        if !allowed {
            debug!(source_addr = %source_addr, limit = hourly_limit, "10DLC hourly limit reached");
            return Ok(false);
        }

        let day_key = format!("rate:10dlc:day:{}:{}", source_addr, now.format("%Y%m%d"));
        let (allowed, _) = self.check(&day_key, daily_limit, DAY_WINDOW).await?;
        if !allowed {
            debug!(source_addr = %source_addr, limit = daily_limit, "10DLC daily limit reached");
        }
        Ok(allowed)
    }

    /// Current value of a counter; a missing key is 0
    pub async fn current_count(&self, key: &str) -> Result<i64> {
        Ok(self.store.get(key).await?.unwrap_or(0))
    }

    /// Drop every per-second window for a vendor
    pub async fn reset_vendor_limit(&self, vendor_id: &str) -> Result<()> {
        let pattern = format!("rate:vendor:{vendor_id}:*");
        let keys = self.store.scan(&pattern).await?;
        for key in &keys {
            if let Err(e) = self.store.del(key).await {
                warn!(key = %key, error = %e, "Failed to delete rate limit key");
            }
        }
        debug!(vendor_id = %vendor_id, keys = keys.len(), "Vendor rate limit reset");
        Ok(())
    }

    async fn check(&self, key: &str, limit: i64, window: Duration) -> Result<(bool, i64)> {
        let count = self.store.incr(key).await?;
        if count == 1 {
            if let Err(e) = self.store.expire(key, window).await {
                warn!(key = %key, error = %e, "Failed to set rate limit window expiry");
            }
        }
        Ok((count <= limit, (limit - count).max(0)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn limiter_at(start: DateTime<Utc>) -> (RateLimiter, Arc<MemoryCounterStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryCounterStore::new());
        let clock = Arc::new(ManualClock::new(start));
        let limiter = RateLimiter::new(store.clone()).with_clock(clock.clone());
        (limiter, store, clock)
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 9, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_vendor_limit_window() {
        let (limiter, store, clock) = limiter_at(noon());

        assert_eq!(limiter.check_vendor_limit("v1", 2).await.unwrap(), (true, 1));
        assert_eq!(limiter.check_vendor_limit("v1", 2).await.unwrap(), (true, 0));
        assert_eq!(limiter.check_vendor_limit("v1", 2).await.unwrap(), (false, 0));

        let key = format!("rate:vendor:v1:{}", noon().timestamp());
        assert_eq!(limiter.current_count(&key).await.unwrap(), 3);
        assert!(store.ttl(&key).is_some());

        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(limiter.check_vendor_limit("v1", 2).await.unwrap(), (true, 1));
    }

    #[tokio::test]
    async fn test_non_positive_limit_is_unlimited() {
        let (limiter, store, _) = limiter_at(noon());

        for _ in 0..5 {
            assert_eq!(limiter.check_vendor_limit("v1", 0).await.unwrap(), (true, 0));
            assert_eq!(limiter.check_customer_limit("c1", -1).await.unwrap(), (true, 0));
        }
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_customer_limit_per_minute() {
        let (limiter, _, clock) = limiter_at(noon());

        for i in 0..3 {
            let (allowed, remaining) = limiter.check_customer_limit("acme", 3).await.unwrap();
            assert!(allowed);
            assert_eq!(remaining, 2 - i);
        }
        assert!(!limiter.check_customer_limit("acme", 3).await.unwrap().0);

        // Same minute, still rejected
        clock.advance(chrono::Duration::seconds(30));
        assert!(!limiter.check_customer_limit("acme", 3).await.unwrap().0);

        clock.advance(chrono::Duration::seconds(30));
        assert!(limiter.check_customer_limit("acme", 3).await.unwrap().0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_customer_hundred_per_minute_boundary() {
        let (limiter, store, _) = limiter_at(noon());
        let key = format!("rate:customer:acme:{}", noon().timestamp() / 60);

        for _ in 0..100 {
            assert!(limiter.check_customer_limit("acme", 100).await.unwrap().0);
        }
        assert_eq!(limiter.check_customer_limit("acme", 100).await.unwrap(), (false, 0));
        assert_eq!(limiter.current_count(&key).await.unwrap(), 101);

        // The window counter lapses once its minute has passed
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.current_count(&key).await.unwrap(), 0);
        assert!(store.is_empty());
        assert_eq!(limiter.check_customer_limit("acme", 100).await.unwrap(), (true, 99));
    }

    #[tokio::test]
    async fn test_10dlc_hourly_boundary_skips_daily() {
        let (limiter, _, clock) = limiter_at(noon());

        assert!(limiter.check_10dlc_limit("+15550001", 2, 10).await.unwrap());
        assert!(limiter.check_10dlc_limit("+15550001", 2, 10).await.unwrap());
        assert!(!limiter.check_10dlc_limit("+15550001", 2, 10).await.unwrap());

        let day_key = "rate:10dlc:day:+15550001:20251009";
        assert_eq!(limiter.current_count(day_key).await.unwrap(), 2);

        clock.advance(chrono::Duration::hours(1));
        assert!(limiter.check_10dlc_limit("+15550001", 2, 10).await.unwrap());
        assert_eq!(limiter.current_count(day_key).await.unwrap(), 3);
        assert_eq!(
            limiter
                .current_count("rate:10dlc:hour:+15550001:2025100913")
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_10dlc_daily_cap() {
        let (limiter, _, clock) = limiter_at(noon());

        assert!(limiter.check_10dlc_limit("+15550002", 5, 2).await.unwrap());
        clock.advance(chrono::Duration::hours(1));
        assert!(limiter.check_10dlc_limit("+15550002", 5, 2).await.unwrap());
        clock.advance(chrono::Duration::hours(1));
        assert!(!limiter.check_10dlc_limit("+15550002", 5, 2).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_key_counts_zero() {
        let (limiter, _, _) = limiter_at(noon());
        assert_eq!(limiter.current_count("rate:vendor:none:1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reset_vendor_limit() {
        let (limiter, store, clock) = limiter_at(noon());

        limiter.check_vendor_limit("v1", 1).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        limiter.check_vendor_limit("v1", 1).await.unwrap();
        limiter.check_vendor_limit("v2", 1).await.unwrap();
        assert_eq!(store.len(), 3);

        limiter.reset_vendor_limit("v1").await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(limiter.check_vendor_limit("v1", 1).await.unwrap().0);
    }
}
