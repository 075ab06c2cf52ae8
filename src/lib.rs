//! QuotaGuard
//!
//! This library provides the core of the QuotaGuard quota service: the
//! token-bucket engine, the live bucket container, the event pipeline, and
//! the service façade with its runtime reconfiguration contract.

pub mod admin;
pub mod bucket;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod service;

pub use config::{BucketConfig, NamespaceConfig, ServiceConfig};
pub use error::QuotaError;
pub use events::{Event, EventType, Listener};
pub use service::{Administrable, QuotaService};
