//! Core collection pipeline logic.
//!
//! This module contains:
//! - CacheStore: per-module TTL cache with atomic publishes
//! - exec: child-process launch and deadline-bounded reaping
//! - merge: baseline/provider/plugin/override folding
//! - diff: full vs. partial update determination
//! - RunLock: host-wide run exclusivity
//! - Collector: the per-run cycle driver

pub mod cache;
pub mod collector;
pub mod diff;
pub mod exec;
pub mod lock;
pub mod merge;

// Re-export commonly used types
pub use cache::CacheStore;
pub use collector::{Collector, CycleReport};
pub use diff::DiffOutcome;
pub use lock::{LockError, RunLock};
