//! Quota Service Façade
//!
//! Assembles the container, the event pipeline, and the janitor into one
//! service exposing `allow` to transports and the [`Administrable`]
//! contract to the admin surface.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::bucket::{BucketContainer, BucketFactory};
use crate::clock::{Clock, SystemClock};
use crate::config::{NamespaceConfig, ServiceConfig};
use crate::error::QuotaError;
use crate::events::{Event, EventPipeline, EventProducer, Listener};

/// Runtime reconfiguration contract exposed to the admin surface
#[async_trait]
pub trait Administrable: Send + Sync + 'static {
    /// Snapshot of the current service configuration
    async fn configs(&self) -> ServiceConfig;

    /// Install a new namespace; fails on duplicates or invalid config
    async fn add_namespace(&self, name: &str, cfg: NamespaceConfig) -> Result<(), QuotaError>;

    /// Replace a namespace; fails if unknown or invalid
    async fn update_namespace(&self, name: &str, cfg: NamespaceConfig) -> Result<(), QuotaError>;

    /// Detach a namespace; fails if unknown
    async fn delete_namespace(&self, name: &str) -> Result<(), QuotaError>;
}

/// The quota service: token grants on the data plane, namespace
/// reconfiguration on the admin plane
pub struct QuotaService {
    container: Arc<BucketContainer>,
    events: EventProducer,
    pipeline: Mutex<Option<EventPipeline>>,
    janitor: Mutex<Option<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl QuotaService {
    /// Validate the config, build all static buckets, and start the event
    /// consumer and the eviction janitor.
    pub fn start(
        config: ServiceConfig,
        factory: Arc<dyn BucketFactory>,
        listener: Listener,
    ) -> Result<Self, QuotaError> {
        Self::start_with_clock(config, factory, listener, Arc::new(SystemClock))
    }

    /// Like [`QuotaService::start`] with an explicit time source.
    pub fn start_with_clock(
        mut config: ServiceConfig,
        factory: Arc<dyn BucketFactory>,
        listener: Listener,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, QuotaError> {
        config.apply_defaults()?;

        let pipeline = EventPipeline::start(config.listener_buffer_size, listener);
        let events = pipeline.producer();
        let container = Arc::new(BucketContainer::new(config, factory, events.clone(), clock));
        let janitor = container.clone().spawn_janitor();

        tracing::info!("Quota service started");
        Ok(Self {
            container,
            events,
            pipeline: Mutex::new(Some(pipeline)),
            janitor: Mutex::new(Some(janitor)),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Request `tokens` from `(namespace, name)`, waiting at most `max_wait`.
    ///
    /// Returns the time actually waited on a grant. Refusals come back as
    /// typed errors; none are swallowed.
    pub async fn allow(
        &self,
        namespace: &str,
        name: &str,
        tokens: i64,
        max_wait: Duration,
    ) -> Result<Duration, QuotaError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(QuotaError::ServiceUnavailable);
        }

        let Some((bucket, _created)) = self.container.find_bucket(namespace, name).await else {
            return Err(QuotaError::BucketNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            });
        };

        match bucket.take(tokens, max_wait).await {
            Ok(waited) => {
                self.events.emit(Event::tokens_served(
                    bucket.namespace(),
                    bucket.name(),
                    bucket.dynamic(),
                    tokens,
                    waited,
                ));
                Ok(waited)
            }
            Err(err @ QuotaError::Timeout(_)) => {
                self.events.emit(Event::timeout_serving_tokens(
                    bucket.namespace(),
                    bucket.name(),
                    bucket.dynamic(),
                    tokens,
                ));
                Err(err)
            }
            Err(err @ QuotaError::TooManyTokensRequested { .. }) => {
                self.events.emit(Event::too_many_tokens_requested(
                    bucket.namespace(),
                    bucket.name(),
                    bucket.dynamic(),
                    tokens,
                ));
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Stop serving tokens, stop the janitor, and drain the event pipeline.
    ///
    /// In-flight takes complete with their committed grants; new calls get
    /// `ServiceUnavailable`.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(janitor) = self.janitor.lock().await.take() {
            janitor.abort();
        }
        if let Some(pipeline) = self.pipeline.lock().await.take() {
            pipeline.shutdown().await;
        }
        tracing::info!("Quota service stopped");
    }

    /// Total events dropped by the pipeline under pressure
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }
}

#[async_trait]
impl Administrable for QuotaService {
    async fn configs(&self) -> ServiceConfig {
        self.container.configs().await
    }

    async fn add_namespace(&self, name: &str, cfg: NamespaceConfig) -> Result<(), QuotaError> {
        self.container.add_namespace(name, cfg).await
    }

    async fn update_namespace(&self, name: &str, cfg: NamespaceConfig) -> Result<(), QuotaError> {
        self.container.update_namespace(name, cfg).await
    }

    async fn delete_namespace(&self, name: &str) -> Result<(), QuotaError> {
        self.container.delete_namespace(name).await
    }
}
