//! Event Notification Pipeline
//!
//! The engine reports everything it does as [`Event`]s: grants, refusals,
//! lookup misses, and dynamic-bucket lifecycle changes. Events flow through
//! a bounded buffer to a single listener. Emission never blocks the data
//! path; when the buffer is full the event is dropped and a throttled
//! warning is logged.

use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::NANOS_PER_SEC;

/// What happened, as reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// A grant succeeded
    TokensServed,
    /// The required wait exceeded the caller or debt limit
    TimeoutServingTokens,
    /// A request asked for more than `max_tokens_per_request`
    TooManyTokensRequested,
    /// A lookup fell back to a default bucket
    BucketMiss,
    /// A dynamic bucket was minted
    BucketCreated,
    /// A dynamic bucket was evicted or its namespace removed
    BucketRemoved,
}

/// A single engine event.
///
/// One tagged record covers every event type; fields a type does not use
/// are zero-valued.
#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub event_type: EventType,
    pub namespace: String,
    pub bucket_name: String,
    pub dynamic: bool,
    pub num_tokens: i64,
    pub wait_time: Duration,
}

impl Event {
    fn named(event_type: EventType, namespace: &str, bucket_name: &str, dynamic: bool) -> Self {
        Self {
            event_type,
            namespace: namespace.to_string(),
            bucket_name: bucket_name.to_string(),
            dynamic,
            num_tokens: 0,
            wait_time: Duration::ZERO,
        }
    }

    pub fn tokens_served(
        namespace: &str,
        bucket_name: &str,
        dynamic: bool,
        num_tokens: i64,
        wait_time: Duration,
    ) -> Self {
        Self {
            num_tokens,
            wait_time,
            ..Self::named(EventType::TokensServed, namespace, bucket_name, dynamic)
        }
    }

    pub fn timeout_serving_tokens(
        namespace: &str,
        bucket_name: &str,
        dynamic: bool,
        num_tokens: i64,
    ) -> Self {
        Self {
            num_tokens,
            ..Self::named(
                EventType::TimeoutServingTokens,
                namespace,
                bucket_name,
                dynamic,
            )
        }
    }

    pub fn too_many_tokens_requested(
        namespace: &str,
        bucket_name: &str,
        dynamic: bool,
        num_tokens: i64,
    ) -> Self {
        Self {
            num_tokens,
            ..Self::named(
                EventType::TooManyTokensRequested,
                namespace,
                bucket_name,
                dynamic,
            )
        }
    }

    pub fn bucket_miss(namespace: &str, bucket_name: &str, dynamic: bool) -> Self {
        Self::named(EventType::BucketMiss, namespace, bucket_name, dynamic)
    }

    pub fn bucket_created(namespace: &str, bucket_name: &str, dynamic: bool) -> Self {
        Self::named(EventType::BucketCreated, namespace, bucket_name, dynamic)
    }

    pub fn bucket_removed(namespace: &str, bucket_name: &str, dynamic: bool) -> Self {
        Self::named(EventType::BucketRemoved, namespace, bucket_name, dynamic)
    }
}

/// The single callback that consumes engine events
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

enum PipelineMsg {
    Event(Event),
    Shutdown,
}

#[derive(Debug)]
struct ProducerInner {
    tx: mpsc::Sender<PipelineMsg>,
    dropped: AtomicU64,
    started: Instant,
    // Nanos since `started` of the last overflow warning.
    last_warn: AtomicI64,
}

/// Non-blocking handle for emitting events into the pipeline
#[derive(Debug, Clone)]
pub struct EventProducer {
    inner: Arc<ProducerInner>,
}

impl EventProducer {
    /// Emit an event without blocking.
    ///
    /// If the buffer is full the event is dropped and a warning is logged
    /// at most once per second. After shutdown, emission is a no-op.
    pub fn emit(&self, event: Event) {
        match self.inner.tx.try_send(PipelineMsg::Event(event)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                self.warn_throttled();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Total events dropped because the buffer was full
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn warn_throttled(&self) {
        let now = self.inner.started.elapsed().as_nanos() as i64;
        let last = self.inner.last_warn.load(Ordering::Relaxed);
        if now.saturating_sub(last) >= NANOS_PER_SEC
            && self
                .inner
                .last_warn
                .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            tracing::warn!(
                dropped = self.inner.dropped.load(Ordering::Relaxed),
                "Event buffer full; dropping events"
            );
        }
    }
}

/// Bounded fan-out from the engine to a single listener
pub struct EventPipeline {
    producer: EventProducer,
    consumer: JoinHandle<()>,
}

impl EventPipeline {
    /// Start the pipeline: a bounded channel plus one consumer task that
    /// invokes `listener` for each event in enqueue order.
    ///
    /// A panicking listener is caught and logged; the pipeline continues.
    pub fn start(buffer_size: usize, listener: Listener) -> Self {
        let (producer, mut rx) = Self::channel(buffer_size);

        let consumer = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    PipelineMsg::Event(event) => {
                        if catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                            tracing::error!("Event listener panicked; pipeline continues");
                        }
                    }
                    PipelineMsg::Shutdown => break,
                }
            }
        });

        Self { producer, consumer }
    }

    fn channel(buffer_size: usize) -> (EventProducer, mpsc::Receiver<PipelineMsg>) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let producer = EventProducer {
            inner: Arc::new(ProducerInner {
                tx,
                dropped: AtomicU64::new(0),
                started: Instant::now(),
                last_warn: AtomicI64::new(-NANOS_PER_SEC),
            }),
        };
        (producer, rx)
    }

    /// Clone of the emission handle
    pub fn producer(&self) -> EventProducer {
        self.producer.clone()
    }

    /// Drain queued events, then stop the consumer.
    pub async fn shutdown(self) {
        let _ = self.producer.inner.tx.send(PipelineMsg::Shutdown).await;
        let _ = self.consumer.await;
    }
}
