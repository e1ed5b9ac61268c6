// src/lib.rs

//! Talk search index sync library.
//!
//! Converges a remote search collection to a locally computed record set
//! through a staging copy and an atomic promote, writing only the delta.

pub mod error;
pub mod models;
pub mod remote;
pub mod sync;
pub mod utils;

pub use error::{AppError, Result};
pub use models::{Config, Record};
pub use remote::{AlgoliaIndex, MemoryIndex, RemoteIndex, RemoteIndexClient};
pub use sync::{SyncContext, SyncReport, SyncState};
