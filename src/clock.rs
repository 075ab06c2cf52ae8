//! Time Source Abstraction
//!
//! All token accounting is done on nanosecond timestamps supplied by a
//! [`Clock`], so the engine can be driven deterministically in tests.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub const NANOS_PER_MILLI: i64 = 1_000_000;
pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Source of the current time as nanoseconds since the UNIX epoch
pub trait Clock: fmt::Debug + Send + Sync {
    fn now_nanos(&self) -> i64;
}

/// Wall-clock time source used in production
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0)
    }
}
