//! gip - host-resident grid information collector
//!
//! Gathers state from local batch systems and storage elements by running
//! a fleet of external provider/plugin executables concurrently under a
//! deadline, and republishes the results as standardized records.
//!
//! # Architecture
//!
//! One control process, N independently scheduled child processes:
//! - Each stale module runs as its own OS child with stdout captured
//! - Successful output is cached on disk with TTL semantics
//! - Provider output replaces whole records, plugin output overlays
//!   attributes, operator overrides win last
//! - The merged set is diffed against the previous snapshot into full
//!   and partial updates
//! - A host-wide lock keeps overlapping runs exclusive
//!
//! # Modules
//!
//! - `domain`: Data structures (Record, ModuleDescriptor, Snapshot)
//! - `core`: Pipeline logic (CacheStore, exec, merge, diff, RunLock,
//!   Collector)
//! - `config`: YAML config file + environment overrides
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run one collection cycle
//! gip run --config /etc/gip/gip.yaml
//!
//! # Drop all cached module output
//! gip flush
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use config::GipConfig;
pub use core::{CacheStore, Collector, CycleReport, LockError, RunLock};
pub use domain::{ModuleDescriptor, ModuleKind, ModuleStatus, ParseError, Record, Snapshot};
