//! Quota Service Error Types
//!
//! This module defines all error kinds surfaced by the engine, the admin
//! path, and the service façade.

use std::time::Duration;

/// Error kinds for quota operations
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// Configuration rejected at load time or on an admin mutation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Admin operation referenced a namespace that does not exist
    #[error("Unknown namespace: {0}")]
    UnknownNamespace(String),

    /// Admin add of a namespace that is already present
    #[error("Namespace already exists: {0}")]
    DuplicateNamespace(String),

    /// Request asked for more tokens than the bucket serves per request
    #[error("Requested {requested} tokens; maximum per request is {max}")]
    TooManyTokensRequested { requested: i64, max: i64 },

    /// Tokens exist but the required wait exceeds the caller or debt limit
    #[error("Would need to wait {0:?} for tokens")]
    Timeout(Duration),

    /// Lookup found no bucket and no global default is configured
    #[error("No bucket for {namespace}:{name} and no global default configured")]
    BucketNotFound { namespace: String, name: String },

    /// Service is shutting down and no longer serves tokens
    #[error("Service unavailable")]
    ServiceUnavailable,
}
