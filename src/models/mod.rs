// src/models/mod.rs

//! Domain models for the sync engine.
//!
//! Records and batch operations flow through the engine; configuration and
//! default settings describe where and how they are written.

mod batch;
mod config;
mod record;
mod settings;

// Re-export all public types
pub use batch::{BatchOperation, ManifestEntry};
pub use config::{AlgoliaConfig, BatchConfig, Config, GuardConfig, IndexConfig};
pub use record::{OBJECT_ID, Record, content_hash, get_local_object_ids};
pub use settings::{default_settings, merge_settings};
