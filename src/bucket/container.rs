//! Live Bucket Container
//!
//! Owns the two-level map from namespace to live buckets and resolves every
//! lookup: static bucket, then dynamic template, then namespace default,
//! then global default. Dynamic buckets are minted on first reference
//! (subject to the per-namespace cap) and evicted by a janitor sweep when
//! idle. Admin mutations swap whole namespace subtrees under a single
//! writer lock; readers snapshot an `Arc` per lookup, so in-flight takes on
//! a removed namespace complete against the detached subtree.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::{
    NamespaceConfig, ServiceConfig, DEFAULT_BUCKET_NAME, GLOBAL_NAMESPACE,
};
use crate::error::QuotaError;
use crate::events::{Event, EventProducer};

use super::factory::BucketFactory;
use super::token_bucket::TokenBucket;

// Floor on the janitor period so tiny idle timeouts cannot spin the sweep.
const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(10);

#[derive(Debug)]
struct Namespace {
    cfg: NamespaceConfig,
    default_bucket: Option<Arc<TokenBucket>>,
    static_buckets: HashMap<String, Arc<TokenBucket>>,
    dynamic_buckets: RwLock<HashMap<String, Arc<TokenBucket>>>,
}

#[derive(Debug)]
struct ContainerState {
    config: ServiceConfig,
    namespaces: HashMap<String, Arc<Namespace>>,
}

/// Owner of all live bucket instances
#[derive(Debug)]
pub struct BucketContainer {
    clock: Arc<dyn Clock>,
    factory: Arc<dyn BucketFactory>,
    events: EventProducer,
    global_default: Option<Arc<TokenBucket>>,
    state: RwLock<ContainerState>,
}

impl BucketContainer {
    /// Build the container from a loaded config: global default bucket plus
    /// every namespace's static buckets.
    pub fn new(
        config: ServiceConfig,
        factory: Arc<dyn BucketFactory>,
        events: EventProducer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let global_default = config
            .global_default_bucket
            .as_ref()
            .map(|cfg| factory.new_bucket(GLOBAL_NAMESPACE, DEFAULT_BUCKET_NAME, cfg, false));

        let namespaces = config
            .namespaces
            .iter()
            .map(|(name, ns_cfg)| {
                (
                    name.clone(),
                    Arc::new(Self::build_namespace(&factory, name, ns_cfg)),
                )
            })
            .collect();

        Self {
            clock,
            factory,
            events,
            global_default,
            state: RwLock::new(ContainerState { config, namespaces }),
        }
    }

    fn build_namespace(
        factory: &Arc<dyn BucketFactory>,
        name: &str,
        cfg: &NamespaceConfig,
    ) -> Namespace {
        let default_bucket = cfg
            .default_bucket
            .as_ref()
            .map(|b| factory.new_bucket(name, DEFAULT_BUCKET_NAME, b, false));

        let static_buckets = cfg
            .buckets
            .iter()
            .map(|(bucket_name, b)| {
                (
                    bucket_name.clone(),
                    factory.new_bucket(name, bucket_name, b, false),
                )
            })
            .collect();

        Namespace {
            cfg: cfg.clone(),
            default_bucket,
            static_buckets,
            dynamic_buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve `(namespace, name)` to a live bucket.
    ///
    /// Returns the bucket and whether it was created by this lookup, or
    /// `None` when nothing matches and no global default is configured.
    pub async fn find_bucket(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<(Arc<TokenBucket>, bool)> {
        let ns = {
            let state = self.state.read().await;
            state.namespaces.get(namespace).cloned()
        };

        let Some(ns) = ns else {
            self.events.emit(Event::bucket_miss(namespace, name, false));
            return self.global_fallback();
        };

        if let Some(bucket) = ns.static_buckets.get(name) {
            bucket.touch();
            return Some((bucket.clone(), false));
        }

        if let Some(template) = ns.cfg.dynamic_bucket_template.as_ref() {
            if let Some(bucket) = ns.dynamic_buckets.read().await.get(name) {
                bucket.touch();
                return Some((bucket.clone(), false));
            }

            let mut dynamic = ns.dynamic_buckets.write().await;
            // Re-check: another caller may have won the race to create.
            if let Some(bucket) = dynamic.get(name) {
                bucket.touch();
                return Some((bucket.clone(), false));
            }
            if dynamic.len() < ns.cfg.max_dynamic_buckets {
                let bucket = self.factory.new_bucket(namespace, name, template, true);
                bucket.touch();
                dynamic.insert(name.to_string(), bucket.clone());
                self.events.emit(Event::bucket_created(namespace, name, true));
                return Some((bucket, true));
            }
            drop(dynamic);

            // Cap reached: the name cannot be served from this namespace.
            self.events.emit(Event::bucket_miss(namespace, name, true));
            return self.global_fallback();
        }

        if let Some(bucket) = ns.default_bucket.as_ref() {
            bucket.touch();
            self.events.emit(Event::bucket_miss(namespace, name, false));
            return Some((bucket.clone(), false));
        }

        self.events.emit(Event::bucket_miss(namespace, name, false));
        self.global_fallback()
    }

    fn global_fallback(&self) -> Option<(Arc<TokenBucket>, bool)> {
        self.global_default.clone().map(|bucket| {
            bucket.touch();
            (bucket, false)
        })
    }

    /// Snapshot of the current service configuration
    pub async fn configs(&self) -> ServiceConfig {
        self.state.read().await.config.clone()
    }

    /// Install a new namespace. Fails if the name is already present.
    pub async fn add_namespace(
        &self,
        name: &str,
        mut cfg: NamespaceConfig,
    ) -> Result<(), QuotaError> {
        Self::check_namespace_name(name)?;
        cfg.apply_defaults(name)?;
        let namespace = Arc::new(Self::build_namespace(&self.factory, name, &cfg));

        let mut state = self.state.write().await;
        if state.namespaces.contains_key(name) {
            return Err(QuotaError::DuplicateNamespace(name.to_string()));
        }
        state.namespaces.insert(name.to_string(), namespace);
        state.config.namespaces.insert(name.to_string(), cfg);
        tracing::info!(namespace = name, "Added namespace");
        Ok(())
    }

    /// Atomically replace a namespace subtree. The old subtree is discarded
    /// wholesale; dynamic buckets are not migrated and static cursors are
    /// not carried over.
    pub async fn update_namespace(
        &self,
        name: &str,
        mut cfg: NamespaceConfig,
    ) -> Result<(), QuotaError> {
        Self::check_namespace_name(name)?;
        cfg.apply_defaults(name)?;
        let namespace = Arc::new(Self::build_namespace(&self.factory, name, &cfg));

        let old = {
            let mut state = self.state.write().await;
            if !state.namespaces.contains_key(name) {
                return Err(QuotaError::UnknownNamespace(name.to_string()));
            }
            state.config.namespaces.insert(name.to_string(), cfg);
            state.namespaces.insert(name.to_string(), namespace)
        };

        if let Some(old) = old {
            self.discard_dynamic_buckets(name, &old).await;
            for bucket in old.static_buckets.values() {
                self.factory.destroy(bucket);
            }
            if let Some(bucket) = old.default_bucket.as_ref() {
                self.factory.destroy(bucket);
            }
        }
        tracing::info!(namespace = name, "Updated namespace");
        Ok(())
    }

    /// Atomically detach a namespace and destroy its buckets. In-flight
    /// takes against them complete normally on the orphaned instances.
    pub async fn delete_namespace(&self, name: &str) -> Result<(), QuotaError> {
        let old = {
            let mut state = self.state.write().await;
            let Some(old) = state.namespaces.remove(name) else {
                return Err(QuotaError::UnknownNamespace(name.to_string()));
            };
            state.config.namespaces.remove(name);
            old
        };

        self.discard_dynamic_buckets(name, &old).await;
        for (bucket_name, bucket) in old.static_buckets.iter() {
            self.factory.destroy(bucket);
            self.events.emit(Event::bucket_removed(name, bucket_name, false));
        }
        if let Some(bucket) = old.default_bucket.as_ref() {
            self.factory.destroy(bucket);
            self.events
                .emit(Event::bucket_removed(name, DEFAULT_BUCKET_NAME, false));
        }
        tracing::info!(namespace = name, "Deleted namespace");
        Ok(())
    }

    async fn discard_dynamic_buckets(&self, namespace: &str, ns: &Namespace) {
        let mut dynamic = ns.dynamic_buckets.write().await;
        for (bucket_name, bucket) in dynamic.drain() {
            self.factory.destroy(&bucket);
            self.events
                .emit(Event::bucket_removed(namespace, &bucket_name, true));
        }
    }

    fn check_namespace_name(name: &str) -> Result<(), QuotaError> {
        if name.is_empty() || name == GLOBAL_NAMESPACE {
            return Err(QuotaError::InvalidConfig(format!(
                "invalid namespace name {name:?}"
            )));
        }
        Ok(())
    }

    /// Janitor tick period: a quarter of the smallest evictable idle
    /// timeout across namespaces with a dynamic template.
    pub async fn sweep_period(&self) -> Option<Duration> {
        let state = self.state.read().await;
        state
            .namespaces
            .values()
            .filter_map(|ns| {
                ns.cfg
                    .dynamic_bucket_template
                    .as_ref()
                    .and_then(|t| t.max_idle_nanos())
            })
            .min()
            .map(|nanos| Duration::from_nanos((nanos / 4) as u64).max(MIN_SWEEP_PERIOD))
    }

    /// Evict dynamic buckets idle longer than their template allows.
    ///
    /// The scan runs under read locks; only the detach of an expired bucket
    /// takes the dynamic-map write lock.
    pub async fn sweep(&self) -> usize {
        let namespaces: Vec<(String, Arc<Namespace>)> = {
            let state = self.state.read().await;
            state
                .namespaces
                .iter()
                .map(|(name, ns)| (name.clone(), ns.clone()))
                .collect()
        };

        let now = self.clock.now_nanos();
        let mut evicted = 0;
        for (ns_name, ns) in namespaces {
            let Some(max_idle) = ns
                .cfg
                .dynamic_bucket_template
                .as_ref()
                .and_then(|t| t.max_idle_nanos())
            else {
                continue;
            };

            let expired: Vec<String> = ns
                .dynamic_buckets
                .read()
                .await
                .iter()
                .filter(|(_, bucket)| bucket.idle_since(now, max_idle))
                .map(|(name, _)| name.clone())
                .collect();
            if expired.is_empty() {
                continue;
            }

            let mut dynamic = ns.dynamic_buckets.write().await;
            for name in expired {
                // Re-check under the write lock; a lookup may have touched
                // the bucket since the scan.
                let still_idle = dynamic
                    .get(&name)
                    .is_some_and(|b| b.idle_since(now, max_idle));
                if still_idle {
                    if let Some(bucket) = dynamic.remove(&name) {
                        self.factory.destroy(&bucket);
                        self.events.emit(Event::bucket_removed(&ns_name, &name, true));
                        evicted += 1;
                    }
                }
            }
        }

        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle dynamic buckets");
        }
        evicted
    }

    /// Spawn the background janitor. The period is recomputed every tick so
    /// admin mutations take effect without a restart.
    pub fn spawn_janitor(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let period = self
                    .sweep_period()
                    .await
                    .unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(period).await;
                self.sweep().await;
            }
        })
    }
}
