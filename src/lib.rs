// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod classify;
pub mod cluster;
pub mod config;
pub mod dedup;
pub mod filter;
pub mod metrics;
pub mod normalize;
pub mod orchestrator;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod scoring;
pub mod series;
pub mod sources;
pub mod store;
pub mod types;

// Shared mocks (sources, classifier) for unit and integration tests.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ---- Re-exports for stable public API ----
pub use crate::config::{AppConfig, ConfigError};
pub use crate::orchestrator::{CollectionOrchestrator, ConsumerPlan};
pub use crate::queue::QueueManager;
pub use crate::store::{memory::MemoryStore, KvStore, SharedStore};
pub use crate::types::{CollectionReport, NormalizedItem, RawItem, ScoredItem};
