//! Token Buckets and Their Container
//!
//! This module holds the accounting engine ([`TokenBucket`]), the
//! construction seam ([`BucketFactory`]), and the live map that owns every
//! bucket instance ([`BucketContainer`]).

pub mod container;
pub mod factory;
#[cfg(test)]
mod proptests;
pub mod token_bucket;

pub use container::BucketContainer;
pub use factory::{BucketFactory, MemoryBucketFactory};
pub use token_bucket::TokenBucket;
