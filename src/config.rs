// Configuration File Support
//
// This module provides the configuration tree for the quota service.
// Configs are parsed from YAML, defaults are applied once at load, and the
// result is treated as an immutable snapshot. Admin mutations produce a new
// snapshot; nothing in the data path ever mutates a config in place.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::clock::NANOS_PER_MILLI;
use crate::error::QuotaError;

/// Reserved namespace name addressing the whole service config on the
/// admin GET surface.
pub const GLOBAL_NAMESPACE: &str = "___GLOBAL___";

/// Bucket name used for namespace and global default buckets.
pub const DEFAULT_BUCKET_NAME: &str = "___DEFAULT_BUCKET___";

pub const DEFAULT_BUCKET_SIZE: i64 = 100;
pub const DEFAULT_FILL_RATE: i64 = 50;
pub const DEFAULT_WAIT_TIMEOUT_MILLIS: i64 = 1000;
pub const DEFAULT_MAX_DEBT_MILLIS: i64 = 10_000;
pub const DEFAULT_LISTENER_BUFFER_SIZE: usize = 10_000;

/// Configuration for a single token bucket
///
/// Fields left out of a config file parse as zero and take the documented
/// defaults in [`BucketConfig::apply_defaults`], so a partial declaration
/// behaves the same as an explicit zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum tokens the bucket may hold
    #[serde(default)]
    pub size: i64,

    /// Tokens added per second
    #[serde(default)]
    pub fill_rate: i64,

    /// Absolute per-request ceiling on caller-supplied wait, in millis
    #[serde(default)]
    pub wait_timeout_millis: i64,

    /// Idle time after which a dynamic bucket is evicted; -1 = never
    #[serde(default)]
    pub max_idle_millis: i64,

    /// Maximum accrued wait a caller may incur, in millis
    #[serde(default)]
    pub max_debt_millis: i64,

    /// Requests for more tokens than this fail fast; 0 = use fill_rate
    #[serde(default)]
    pub max_tokens_per_request: i64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            size: DEFAULT_BUCKET_SIZE,
            fill_rate: DEFAULT_FILL_RATE,
            wait_timeout_millis: DEFAULT_WAIT_TIMEOUT_MILLIS,
            max_idle_millis: -1,
            max_debt_millis: DEFAULT_MAX_DEBT_MILLIS,
            max_tokens_per_request: DEFAULT_FILL_RATE,
        }
    }
}

impl BucketConfig {
    /// Replace zero values with the documented defaults.
    ///
    /// A zero `max_idle_millis` becomes -1 (never evict); a zero
    /// `max_tokens_per_request` follows `fill_rate`.
    pub fn apply_defaults(&mut self) {
        if self.size == 0 {
            self.size = DEFAULT_BUCKET_SIZE;
        }
        if self.fill_rate == 0 {
            self.fill_rate = DEFAULT_FILL_RATE;
        }
        if self.wait_timeout_millis == 0 {
            self.wait_timeout_millis = DEFAULT_WAIT_TIMEOUT_MILLIS;
        }
        if self.max_idle_millis == 0 {
            self.max_idle_millis = -1;
        }
        if self.max_debt_millis == 0 {
            self.max_debt_millis = DEFAULT_MAX_DEBT_MILLIS;
        }
        if self.max_tokens_per_request == 0 {
            self.max_tokens_per_request = self.fill_rate;
        }
    }

    fn validate(&self, context: &str) -> Result<(), QuotaError> {
        if self.size <= 0 {
            return Err(QuotaError::InvalidConfig(format!(
                "{context}: size must be positive, got {}",
                self.size
            )));
        }
        if self.fill_rate <= 0 {
            return Err(QuotaError::InvalidConfig(format!(
                "{context}: fill_rate must be positive, got {}",
                self.fill_rate
            )));
        }
        if self.wait_timeout_millis < 0 {
            return Err(QuotaError::InvalidConfig(format!(
                "{context}: wait_timeout_millis must not be negative, got {}",
                self.wait_timeout_millis
            )));
        }
        if self.max_debt_millis < 0 {
            return Err(QuotaError::InvalidConfig(format!(
                "{context}: max_debt_millis must not be negative, got {}",
                self.max_debt_millis
            )));
        }
        if self.max_tokens_per_request <= 0 {
            return Err(QuotaError::InvalidConfig(format!(
                "{context}: max_tokens_per_request must be positive, got {}",
                self.max_tokens_per_request
            )));
        }
        Ok(())
    }

    /// Caller wait ceiling in nanoseconds
    pub fn wait_timeout_nanos(&self) -> i64 {
        self.wait_timeout_millis.saturating_mul(NANOS_PER_MILLI)
    }

    /// Debt limit in nanoseconds
    pub fn max_debt_nanos(&self) -> i64 {
        self.max_debt_millis.saturating_mul(NANOS_PER_MILLI)
    }

    /// Idle-eviction threshold in nanoseconds; `None` means never evict
    pub fn max_idle_nanos(&self) -> Option<i64> {
        if self.max_idle_millis < 0 {
            None
        } else {
            Some(self.max_idle_millis.saturating_mul(NANOS_PER_MILLI))
        }
    }
}

/// Configuration for a namespace of buckets
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Served when a requested bucket name is not declared; mutually
    /// exclusive with `dynamic_bucket_template`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_bucket: Option<BucketConfig>,

    /// Template used to mint a bucket on first reference; mutually
    /// exclusive with `default_bucket`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dynamic_bucket_template: Option<BucketConfig>,

    /// Cap on concurrently live dynamic buckets; with a template set,
    /// 0 means no dynamic buckets are allowed
    pub max_dynamic_buckets: usize,

    /// Statically declared buckets by name
    pub buckets: HashMap<String, BucketConfig>,
}

impl NamespaceConfig {
    /// Apply bucket defaults and check namespace-level rules.
    pub fn apply_defaults(&mut self, name: &str) -> Result<(), QuotaError> {
        if self.default_bucket.is_some() && self.dynamic_bucket_template.is_some() {
            return Err(QuotaError::InvalidConfig(format!(
                "namespace {name} may not have both a default bucket and a dynamic bucket template"
            )));
        }

        if let Some(b) = self.default_bucket.as_mut() {
            b.apply_defaults();
            b.validate(&format!("namespace {name} default bucket"))?;
        }
        if let Some(b) = self.dynamic_bucket_template.as_mut() {
            b.apply_defaults();
            b.validate(&format!("namespace {name} dynamic bucket template"))?;
        }
        for (bucket_name, b) in self.buckets.iter_mut() {
            b.apply_defaults();
            b.validate(&format!("bucket {name}:{bucket_name}"))?;
        }
        Ok(())
    }
}

/// Top-level service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Catch-all bucket when no namespace matches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_default_bucket: Option<BucketConfig>,

    /// Capacity of the event pipeline's bounded buffer
    pub listener_buffer_size: usize,

    /// Namespaces by name
    pub namespaces: HashMap<String, NamespaceConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            global_default_bucket: None,
            listener_buffer_size: DEFAULT_LISTENER_BUFFER_SIZE,
            namespaces: HashMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Parse a YAML config and apply defaults.
    ///
    /// Unknown keys are ignored. Zero-valued numeric fields take the
    /// documented defaults. Returns `InvalidConfig` on parse failure or
    /// rule violation.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, QuotaError> {
        let mut cfg: ServiceConfig = serde_yaml::from_str(yaml)
            .map_err(|e| QuotaError::InvalidConfig(format!("cannot parse config: {e}")))?;
        cfg.apply_defaults()?;
        Ok(cfg)
    }

    /// Load a YAML config from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, QuotaError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            QuotaError::InvalidConfig(format!("cannot read config file {}: {e}", path.display()))
        })?;
        let cfg = Self::from_yaml_str(&content)?;
        tracing::info!("Loaded configuration from {}", path.display());
        Ok(cfg)
    }

    /// Apply defaults to every bucket config and validate the tree.
    pub fn apply_defaults(&mut self) -> Result<(), QuotaError> {
        if self.listener_buffer_size == 0 {
            self.listener_buffer_size = DEFAULT_LISTENER_BUFFER_SIZE;
        }
        if let Some(b) = self.global_default_bucket.as_mut() {
            b.apply_defaults();
            b.validate("global default bucket")?;
        }
        for (name, ns) in self.namespaces.iter_mut() {
            if name == GLOBAL_NAMESPACE {
                return Err(QuotaError::InvalidConfig(format!(
                    "namespace name {GLOBAL_NAMESPACE} is reserved"
                )));
            }
            ns.apply_defaults(name)?;
        }
        Ok(())
    }
}
