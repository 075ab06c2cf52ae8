//! Property-Based Tests for the Token Bucket Engine
//!
//! Uses proptest to verify accounting invariants over random take
//! sequences, driven by the mock clock so time is fully deterministic.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::test_clock::MockClock;
use crate::clock::NANOS_PER_MILLI;
use crate::config::BucketConfig;
use crate::error::QuotaError;

use super::token_bucket::TokenBucket;

fn runtime() -> tokio::runtime::Runtime {
    // Paused time: committed waits resolve instantly instead of sleeping.
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("test runtime")
}

fn bucket(size: i64, fill_rate: i64, clock: &MockClock) -> TokenBucket {
    let cfg = BucketConfig {
        size,
        fill_rate,
        wait_timeout_millis: 60_000,
        max_debt_millis: 60_000,
        max_tokens_per_request: size.max(fill_rate),
        ..BucketConfig::default()
    };
    TokenBucket::new("prop", "bucket", cfg, false, Arc::new(clock.clone()))
}

proptest! {
    /// Rate ceiling: zero-wait 1-token takers over any window never extract
    /// more than size + fill_rate * window + 1 tokens, no matter how the
    /// takes interleave with clock advances.
    #[test]
    fn prop_rate_ceiling(
        size in 1i64..50,
        fill_rate in 1i64..200,
        steps in prop::collection::vec((0i64..200, 1u32..20), 1..40),
    ) {
        let rt = runtime();
        let clock = MockClock::new(1_000_000_000);
        let bucket = bucket(size, fill_rate, &clock);

        let mut granted: i64 = 0;
        let mut window_millis: i64 = 0;
        rt.block_on(async {
            for (advance_millis, takes) in steps {
                clock.advance_millis(advance_millis);
                window_millis += advance_millis;
                for _ in 0..takes {
                    if bucket.take(1, Duration::ZERO).await.is_ok() {
                        granted += 1;
                    }
                }
            }
        });

        let ceiling = size + fill_rate * window_millis / 1000 + 1;
        prop_assert!(
            granted <= ceiling,
            "granted {granted} > ceiling {ceiling} (size {size}, rate {fill_rate}, window {window_millis}ms)"
        );
    }

    /// A refused take is side-effect free: the cursor after any sequence of
    /// zero-wait takes is identical whether or not refused attempts were
    /// interleaved.
    #[test]
    fn prop_refusals_have_no_side_effects(
        size in 1i64..20,
        fill_rate in 1i64..100,
        attempts in 1u32..30,
    ) {
        let rt = runtime();
        let clock = MockClock::new(1_000_000_000);
        let bucket = bucket(size, fill_rate, &clock);

        rt.block_on(async {
            for _ in 0..attempts {
                let before = bucket.cursor_nanos();
                if bucket.take(1, Duration::ZERO).await.is_err() {
                    prop_assert_eq!(bucket.cursor_nanos(), before);
                }
            }
            Ok(())
        })?;
    }

    /// No grant ever reports a wait above the debt limit.
    #[test]
    fn prop_wait_bounded_by_max_debt(
        max_debt_millis in 1i64..500,
        takes in 1u32..40,
    ) {
        let rt = runtime();
        let clock = MockClock::new(1_000_000_000);
        let cfg = BucketConfig {
            size: 5,
            fill_rate: 100,
            wait_timeout_millis: 60_000,
            max_debt_millis,
            max_tokens_per_request: 5,
            ..BucketConfig::default()
        };
        let bucket = TokenBucket::new("prop", "bucket", cfg, false, Arc::new(clock.clone()));
        let limit = Duration::from_nanos((max_debt_millis * NANOS_PER_MILLI) as u64);

        rt.block_on(async {
            for _ in 0..takes {
                match bucket.take(1, Duration::from_secs(60)).await {
                    Ok(waited) => prop_assert!(waited <= limit, "waited {waited:?} > {limit:?}"),
                    Err(QuotaError::Timeout(_)) => {}
                    Err(other) => prop_assert!(false, "unexpected error {other:?}"),
                }
            }
            Ok(())
        })?;
    }
}
