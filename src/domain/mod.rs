//! Domain types for the collector.
//!
//! This module contains the core data structures:
//! - Record: one published GLUE/LDIF entity
//! - ModuleDescriptor: an external provider/plugin and its per-cycle state
//! - Snapshot: the record set published by the previous cycle

pub mod module;
pub mod record;
pub mod snapshot;

// Re-export commonly used types
pub use module::{discover, ModuleDescriptor, ModuleKind, ModuleStatus};
pub use record::{parse_entries, serialize_entries, ParseError, Record, EXPIRATION_ATTR};
pub use snapshot::Snapshot;
