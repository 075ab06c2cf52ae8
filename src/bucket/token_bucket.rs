//! Token Bucket Engine
//!
//! A bucket's entire mutable state is one atomic timestamp: the fill
//! cursor, the future instant at which every committed grant has accrued.
//! Tokens available at wall time `t` equal
//! `min(size, (t - cursor) * fill_rate)`; a request is served by advancing
//! the cursor with a compare-and-swap loop and sleeping out the difference
//! outside any critical section. Once the cursor advance commits, the
//! caller's entitlement is irrevocable, which yields FIFO grant ordering by
//! commit time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, NANOS_PER_SEC};
use crate::config::BucketConfig;
use crate::error::QuotaError;

/// Nanoseconds needed for `tokens` to accrue at `fill_rate` tokens/second.
///
/// Ceiling division, so the engine never over-grants.
pub(crate) fn nanos_for_tokens(tokens: i64, fill_rate: i64) -> i64 {
    let nanos = (tokens as i128 * NANOS_PER_SEC as i128 + (fill_rate as i128 - 1))
        / fill_rate as i128;
    nanos.min(i64::MAX as i128) as i64
}

fn duration_to_nanos(d: Duration) -> i64 {
    d.as_nanos().min(i64::MAX as u128) as i64
}

/// A single token-bucket instance
#[derive(Debug)]
pub struct TokenBucket {
    namespace: String,
    name: String,
    dynamic: bool,
    cfg: BucketConfig,
    clock: Arc<dyn Clock>,

    /// Instant (nanos since epoch) at which all committed grants have
    /// accrued. Behind `now` means idle credit, ahead means debt.
    cursor: AtomicI64,

    /// Last lookup touch, for idle eviction of dynamic buckets.
    last_access: AtomicI64,
}

impl TokenBucket {
    pub fn new(
        namespace: &str,
        name: &str,
        cfg: BucketConfig,
        dynamic: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_nanos();
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            dynamic,
            cfg,
            clock,
            cursor: AtomicI64::new(now),
            last_access: AtomicI64::new(now),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dynamic(&self) -> bool {
        self.dynamic
    }

    pub fn config(&self) -> &BucketConfig {
        &self.cfg
    }

    /// Request `requested` tokens, willing to wait up to `max_wait`.
    ///
    /// Returns the time actually waited on success. Refusals leave the
    /// cursor untouched:
    ///
    /// - `TooManyTokensRequested` if `requested` is non-positive or above
    ///   `max_tokens_per_request`;
    /// - `Timeout` if the required wait exceeds the caller ceiling
    ///   (`min(max_wait, wait_timeout_millis)`) or the bucket's debt limit.
    pub async fn take(&self, requested: i64, max_wait: Duration) -> Result<Duration, QuotaError> {
        if requested <= 0 || requested > self.cfg.max_tokens_per_request {
            return Err(QuotaError::TooManyTokensRequested {
                requested,
                max: self.cfg.max_tokens_per_request,
            });
        }

        let wait_limit = duration_to_nanos(max_wait)
            .min(self.cfg.wait_timeout_nanos())
            .min(self.cfg.max_debt_nanos());
        let advance = nanos_for_tokens(requested, self.cfg.fill_rate);
        // Idle credit accumulates for at most `size` tokens.
        let credit_window = nanos_for_tokens(self.cfg.size, self.cfg.fill_rate);

        let waited = loop {
            let cursor = self.cursor.load(Ordering::Acquire);
            let now = self.clock.now_nanos();
            let base = cursor.max(now - credit_window);
            let wait = (base - now).max(0);

            if wait > wait_limit {
                // Refused: the cursor must not move.
                return Err(QuotaError::Timeout(Duration::from_nanos(wait as u64)));
            }

            let next = base.saturating_add(advance);
            if self
                .cursor
                .compare_exchange_weak(cursor, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break wait;
            }
        };

        // Entitlement committed; sleep outside the critical section.
        if waited > 0 {
            tokio::time::sleep(Duration::from_nanos(waited as u64)).await;
        }
        Ok(Duration::from_nanos(waited as u64))
    }

    /// Record a lookup touch.
    pub(crate) fn touch(&self) {
        self.last_access
            .store(self.clock.now_nanos(), Ordering::Relaxed);
    }

    /// Whether this bucket has been idle longer than `max_idle_nanos`.
    pub(crate) fn idle_since(&self, now_nanos: i64, max_idle_nanos: i64) -> bool {
        now_nanos - self.last_access.load(Ordering::Relaxed) > max_idle_nanos
    }

    #[cfg(test)]
    pub(crate) fn cursor_nanos(&self) -> i64 {
        self.cursor.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_clock::MockClock;

    fn bucket_with(cfg: BucketConfig, clock: MockClock) -> TokenBucket {
        TokenBucket::new("test", "bucket", cfg, false, Arc::new(clock))
    }

    fn burst_config() -> BucketConfig {
        // 10 tokens, refilled at 10/s: one full drain takes 1s to recover.
        BucketConfig {
            size: 10,
            fill_rate: 10,
            wait_timeout_millis: 60_000,
            max_debt_millis: 60_000,
            max_tokens_per_request: 10,
            ..BucketConfig::default()
        }
    }

    #[test]
    fn test_nanos_for_tokens_rounds_up() {
        assert_eq!(nanos_for_tokens(10, 10), NANOS_PER_SEC);
        assert_eq!(nanos_for_tokens(1, 10), NANOS_PER_SEC / 10);
        // 1e9 / 3 does not divide evenly; ceiling keeps the product >= 1s.
        assert_eq!(nanos_for_tokens(1, 3), 333_333_334);
        assert!(nanos_for_tokens(1, 3) * 3 >= NANOS_PER_SEC);
    }

    #[tokio::test]
    async fn test_first_take_from_fresh_bucket_is_immediate() {
        let clock = MockClock::new(NANOS_PER_SEC);
        let bucket = bucket_with(burst_config(), clock);

        let waited = bucket.take(10, Duration::ZERO).await.unwrap();
        assert_eq!(waited, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_drained_bucket_refuses_zero_wait_take() {
        let clock = MockClock::new(NANOS_PER_SEC);
        let bucket = bucket_with(burst_config(), clock);

        bucket.take(10, Duration::ZERO).await.unwrap();
        // The would-wait is now a full second, more than maxWait=0.
        let err = bucket.take(10, Duration::ZERO).await.unwrap_err();
        match err {
            QuotaError::Timeout(would_wait) => {
                assert_eq!(would_wait, Duration::from_secs(1));
            }
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_take_waits_one_fill_interval() {
        let clock = MockClock::new(NANOS_PER_SEC);
        let bucket = bucket_with(burst_config(), clock);

        let first = bucket.take(10, Duration::from_millis(2000)).await.unwrap();
        let second = bucket.take(10, Duration::from_millis(2000)).await.unwrap();

        assert_eq!(first, Duration::ZERO);
        assert_eq!(second, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_request_above_max_tokens_fails_fast() {
        let clock = MockClock::new(NANOS_PER_SEC);
        let bucket = bucket_with(burst_config(), clock);

        let err = bucket.take(11, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(
            err,
            QuotaError::TooManyTokensRequested {
                requested: 11,
                max: 10
            }
        ));
    }

    #[tokio::test]
    async fn test_non_positive_request_fails_fast() {
        let clock = MockClock::new(NANOS_PER_SEC);
        let bucket = bucket_with(burst_config(), clock);

        assert!(bucket.take(0, Duration::ZERO).await.is_err());
        assert!(bucket.take(-3, Duration::ZERO).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refusal_leaves_cursor_untouched() {
        let clock = MockClock::new(NANOS_PER_SEC);
        let bucket = bucket_with(burst_config(), clock);

        bucket.take(10, Duration::ZERO).await.unwrap();
        let cursor_before = bucket.cursor_nanos();

        bucket.take(10, Duration::ZERO).await.unwrap_err();
        assert_eq!(bucket.cursor_nanos(), cursor_before);

        // The refused call never happened: the same request now succeeds
        // with exactly the wait it would have had.
        let waited = bucket.take(10, Duration::from_secs(2)).await.unwrap();
        assert_eq!(waited, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_never_exceeds_max_debt() {
        let clock = MockClock::new(NANOS_PER_SEC);
        let cfg = BucketConfig {
            max_debt_millis: 500,
            ..burst_config()
        };
        let bucket = bucket_with(cfg, clock);

        let mut granted = 0;
        for _ in 0..50 {
            match bucket.take(1, Duration::from_secs(60)).await {
                Ok(waited) => {
                    assert!(waited <= Duration::from_millis(500));
                    granted += 1;
                }
                Err(QuotaError::Timeout(_)) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        // Debt of 500ms at 10 tokens/s admits the first grant plus five
        // more of borrowing.
        assert!(granted >= 1);
        assert!(granted <= 6);
    }

    #[tokio::test]
    async fn test_wait_timeout_caps_caller_max_wait() {
        let clock = MockClock::new(NANOS_PER_SEC);
        let cfg = BucketConfig {
            wait_timeout_millis: 100,
            ..burst_config()
        };
        let bucket = bucket_with(cfg, clock);

        bucket.take(10, Duration::ZERO).await.unwrap();
        // Caller is happy to wait 10s but the bucket caps waits at 100ms.
        let err = bucket.take(1, Duration::from_secs(10)).await.unwrap_err();
        assert!(matches!(err, QuotaError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_idle_credit_capped_at_size() {
        let clock = MockClock::new(NANOS_PER_SEC);
        let bucket = bucket_with(burst_config(), clock.clone());

        // A long idle period accrues at most `size` tokens of credit.
        clock.advance_millis(100_000);

        let mut granted = 0;
        while bucket.take(1, Duration::ZERO).await.is_ok() {
            granted += 1;
            assert!(granted < 100, "idle credit is not being capped");
        }
        // size tokens of credit, plus at most one token of borrowing.
        assert!((10..=11).contains(&granted), "granted {granted}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_one_token_takes_all_granted() {
        let clock = MockClock::new(NANOS_PER_SEC);
        let cfg = BucketConfig {
            size: 1,
            fill_rate: 1000,
            max_tokens_per_request: 1000,
            ..burst_config()
        };
        let bucket = Arc::new(bucket_with(cfg, clock));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let b = bucket.clone();
            handles.push(tokio::spawn(async move {
                b.take(1, Duration::from_secs(60)).await
            }));
        }

        let mut granted = 0;
        let mut max_waited = Duration::ZERO;
        for handle in handles {
            let waited = handle.await.unwrap().unwrap();
            granted += 1;
            max_waited = max_waited.max(waited);
        }

        assert_eq!(granted, 20);
        // 20 tokens at 1000/s: nobody waits longer than 20ms.
        assert!(max_waited <= Duration::from_millis(21), "{max_waited:?}");
    }
}
