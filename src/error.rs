// src/error.rs

//! Unified error handling for the sync engine.

use std::fmt;

use thiserror::Error;

use crate::sync::SyncState;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// A remote index verb failed
    #[error("{operation} on '{collection}' failed: {message}")]
    Remote {
        operation: &'static str,
        collection: String,
        message: String,
    },

    /// The collection does not exist
    #[error("Collection '{collection}' does not exist")]
    NotFound { collection: String },

    /// Waiting on a remote task failed
    #[error("Task {task_id} on '{collection}' failed: {message}")]
    Task {
        collection: String,
        task_id: u64,
        message: String,
    },

    /// A batch chunk failed
    #[error("Batch chunk #{index} failed: {source}")]
    Chunk {
        index: usize,
        #[source]
        source: Box<AppError>,
    },

    /// A sync run aborted in the given step
    #[error("Sync aborted during {state}: {source}")]
    Step {
        state: SyncState,
        production_touched: bool,
        #[source]
        source: Box<AppError>,
    },

    /// Only one of the two promote moves went through
    #[error(
        "Promote partially applied (index promoted: {index_promoted}, manifest promoted: {manifest_promoted}): {message}"
    )]
    PartialPromote {
        index_promoted: bool,
        manifest_promoted: bool,
        message: String,
    },

    /// Local record count dropped too far below the manifest
    #[error(
        "Circuit breaker triggered: {previous_count} -> {current_count} records ({drop_percent:.1}% drop > {threshold_percent}%)"
    )]
    CircuitBreakerTriggered {
        current_count: usize,
        previous_count: usize,
        drop_percent: f64,
        threshold_percent: u8,
    },

    /// No local records while production still holds documents
    #[error("Refusing to sync an empty record set over {previous_count} live documents")]
    EmptyRecordSet { previous_count: usize },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a remote verb error.
    pub fn remote(
        operation: &'static str,
        collection: impl Into<String>,
        message: impl fmt::Display,
    ) -> Self {
        Self::Remote {
            operation,
            collection: collection.into(),
            message: message.to_string(),
        }
    }

    /// Create a missing-collection error.
    pub fn not_found(collection: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
        }
    }

    /// Create a task wait error.
    pub fn task(collection: impl Into<String>, task_id: u64, message: impl fmt::Display) -> Self {
        Self::Task {
            collection: collection.into(),
            task_id,
            message: message.to_string(),
        }
    }

    /// Decorate an error with the index of the chunk it came from.
    pub fn chunk(index: usize, source: AppError) -> Self {
        Self::Chunk {
            index,
            source: Box::new(source),
        }
    }

    /// Wrap an error with the sync step it aborted.
    pub fn step(state: SyncState, source: AppError) -> Self {
        Self::Step {
            state,
            production_touched: state == SyncState::Promote,
            source: Box::new(source),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether production and its manifest may now disagree.
    pub fn requires_reconciliation(&self) -> bool {
        match self {
            Self::PartialPromote { .. } => true,
            Self::Step {
                production_touched,
                source,
                ..
            } => *production_touched || source.requires_reconciliation(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_error_carries_index() {
        let err = AppError::chunk(3, AppError::remote("batch", "talks_tmp", "boom"));
        assert!(matches!(err, AppError::Chunk { index: 3, .. }));
        assert_eq!(
            err.to_string(),
            "Batch chunk #3 failed: batch on 'talks_tmp' failed: boom"
        );
    }

    #[test]
    fn test_step_before_promote_is_safe() {
        let err = AppError::step(
            SyncState::ApplyDiff,
            AppError::remote("batch", "talks_tmp", "boom"),
        );
        assert!(!err.requires_reconciliation());
    }

    #[test]
    fn test_step_during_promote_needs_reconciliation() {
        let err = AppError::step(
            SyncState::Promote,
            AppError::remote("move", "talks_tmp", "boom"),
        );
        assert!(err.requires_reconciliation());
    }
}
