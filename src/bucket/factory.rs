//! Bucket Construction Seam
//!
//! A [`BucketFactory`] turns a [`BucketConfig`] into a runnable bucket. The
//! in-memory implementation is the reference; a distributed implementation
//! (backing the cursor with a remote store) can be plugged in here without
//! touching the container.

use std::fmt;
use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::BucketConfig;

use super::token_bucket::TokenBucket;

/// Constructs and releases bucket instances. Must be safe for concurrent use.
pub trait BucketFactory: fmt::Debug + Send + Sync {
    /// Build a bucket for `(namespace, name)` from `cfg`.
    fn new_bucket(
        &self,
        namespace: &str,
        name: &str,
        cfg: &BucketConfig,
        dynamic: bool,
    ) -> Arc<TokenBucket>;

    /// Release any resources held by `bucket`. No-op for in-memory buckets.
    fn destroy(&self, bucket: &TokenBucket) {
        let _ = bucket;
    }
}

/// Reference factory: a bucket is just its cursor, config, and last-access
/// timestamp in process memory.
#[derive(Debug)]
pub struct MemoryBucketFactory {
    clock: Arc<dyn Clock>,
}

impl MemoryBucketFactory {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl Default for MemoryBucketFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BucketFactory for MemoryBucketFactory {
    fn new_bucket(
        &self,
        namespace: &str,
        name: &str,
        cfg: &BucketConfig,
        dynamic: bool,
    ) -> Arc<TokenBucket> {
        Arc::new(TokenBucket::new(
            namespace,
            name,
            cfg.clone(),
            dynamic,
            self.clock.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_factory_builds_configured_bucket() {
        let factory = MemoryBucketFactory::new();
        let cfg = BucketConfig {
            size: 5,
            fill_rate: 2,
            ..BucketConfig::default()
        };

        let bucket = factory.new_bucket("ns", "b", &cfg, true);
        assert_eq!(bucket.namespace(), "ns");
        assert_eq!(bucket.name(), "b");
        assert!(bucket.dynamic());
        assert_eq!(bucket.config().size, 5);
        assert_eq!(bucket.config().fill_rate, 2);

        // Destroy is a no-op for in-memory buckets.
        factory.destroy(&bucket);
    }
}
