//! Mirror boost engine
//!
//! This crate provides the core functionality for:
//! - Load time sampling of SRI-protected page resources
//! - Per-host latency aggregation and an integrity digest index
//! - Replacement of slow resources with same-digest mirrors
//! - Expiry of stale records
//! - Health checks and observability

pub mod aggregator;
pub mod collector;
pub mod config;
pub mod dom;
pub mod health;
pub mod mirror;
pub mod models;
pub mod observability;
pub mod session;
pub mod storage;

#[cfg(test)]
mod testing;

pub use aggregator::{AggregateReport, Aggregator, BatchOutcome, ExpiryWorker, SweepReport};
pub use config::{BoostConfig, ConfigError, ConfigOverrides, Placement, ReplaceMode};
pub use health::{
    Component, ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use mirror::{MirrorLookup, MirrorReplacer, MirrorSelector};
pub use models::*;
pub use observability::{BoostMetrics, StructuredLogger};
pub use session::{PageSession, SessionReport};
pub use storage::{JsonFileStore, KvStore, MemoryStore, Partition, Storage, StorageError};
