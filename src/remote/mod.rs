//! Remote document-index abstractions.
//!
//! `RemoteIndex` is the raw service boundary: every write returns a task
//! identifier that completes asynchronously server-side. `RemoteIndexClient`
//! layers the capability verbs the sync engine needs on top of it and never
//! returns from a write before the matching task has completed.
//!
//! ## Backends
//!
//! - [`AlgoliaIndex`]: REST client for the hosted service
//! - [`MemoryIndex`]: in-process collections for development and tests

pub mod algolia;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::BatchOperation;

// Re-export for convenience
pub use algolia::AlgoliaIndex;
pub use memory::MemoryIndex;

/// Identifier of an asynchronous server-side task.
pub type TaskId = u64;

/// One page of a cursor-based browse.
#[derive(Debug, Clone, Default)]
pub struct BrowsePage {
    pub hits: Vec<Value>,
    /// Cursor for the next page; `None` on the last page
    pub cursor: Option<String>,
}

/// Acknowledgment of a multi-collection batch write.
#[derive(Debug, Clone, Default)]
pub struct BatchResponse {
    /// One task per collection touched by the batch
    pub task_ids: BTreeMap<String, TaskId>,
    pub object_ids: Vec<String>,
}

/// Trait for remote index service backends.
#[async_trait]
pub trait RemoteIndex: Send + Sync {
    /// Copy a collection (documents and settings) over `destination`.
    async fn copy_index(&self, source: &str, destination: &str) -> Result<TaskId>;

    /// Rename `source` to `destination`, replacing it in one operation.
    async fn move_index(&self, source: &str, destination: &str) -> Result<TaskId>;

    /// Delete every document of a collection.
    async fn clear_index(&self, name: &str) -> Result<TaskId>;

    async fn set_settings(&self, name: &str, settings: &Value) -> Result<TaskId>;

    /// Read settings; fails when the collection does not exist.
    async fn get_settings(&self, name: &str) -> Result<Value>;

    /// Fetch one page of documents, starting at `cursor`.
    async fn browse(&self, name: &str, cursor: Option<&str>) -> Result<BrowsePage>;

    /// Submit operations possibly targeting several collections.
    async fn batch(&self, operations: &[BatchOperation]) -> Result<BatchResponse>;

    /// Block until the task reports completion.
    async fn wait_task(&self, name: &str, task_id: TaskId) -> Result<()>;
}

/// Capability verbs over a [`RemoteIndex`], with completion waits built in.
#[derive(Clone)]
pub struct RemoteIndexClient {
    index: Arc<dyn RemoteIndex>,
}

impl RemoteIndexClient {
    pub fn new(index: Arc<dyn RemoteIndex>) -> Self {
        Self { index }
    }

    /// Whether a collection exists, checked by reading its settings.
    ///
    /// Any settings read failure counts as "missing"; failures other than not-found
    /// are logged as warnings since they hide an existing collection.
    pub async fn collection_exists(&self, name: &str) -> bool {
        match self.index.get_settings(name).await {
            Ok(_) => true,
            Err(AppError::NotFound { .. }) => {
                log::debug!("'{}' does not exist", name);
                false
            }
            Err(e) => {
                log::warn!(
                    "Settings read for '{}' failed, treating it as missing: {}",
                    name,
                    e
                );
                false
            }
        }
    }

    /// Copy `source` over `destination` and wait for completion.
    ///
    /// The service cannot copy a collection that does not exist yet (first
    /// sync), so `destination` is created with default settings and cleared
    /// instead. Clearing drops whatever a crashed earlier run left there.
    pub async fn copy_collection(&self, source: &str, destination: &str) -> Result<()> {
        if !self.collection_exists(source).await {
            log::info!(
                "'{}' does not exist yet, creating '{}' empty",
                source,
                destination
            );
            self.set_settings(destination, &json!({})).await?;
            return self.clear_collection(destination).await;
        }

        let task = self
            .index
            .copy_index(source, destination)
            .await
            .map_err(|e| logged("copy", destination, e))?;
        self.wait(source, task).await
    }

    /// Atomically replace `destination` with `source`.
    pub async fn move_collection(&self, source: &str, destination: &str) -> Result<()> {
        let task = self
            .index
            .move_index(source, destination)
            .await
            .map_err(|e| logged("move", destination, e))?;
        self.wait(source, task).await
    }

    /// Empty a collection and wait for completion.
    pub async fn clear_collection(&self, name: &str) -> Result<()> {
        let task = self
            .index
            .clear_index(name)
            .await
            .map_err(|e| logged("clear", name, e))?;
        self.wait(name, task).await
    }

    /// Push search settings and wait for completion.
    pub async fn set_settings(&self, name: &str, settings: &Value) -> Result<()> {
        let task = self
            .index
            .set_settings(name, settings)
            .await
            .map_err(|e| logged("set_settings", name, e))?;
        self.wait(name, task).await
    }

    /// Lazily stream every document of a collection.
    ///
    /// Pages are fetched on demand while the stream is polled; the stream ends
    /// after the last page and yields the error of a failed page fetch.
    pub fn browse_all<'a>(&'a self, name: &'a str) -> BoxStream<'a, Result<Value>> {
        enum Cursor {
            Start,
            Next(String),
            Done,
        }

        stream::try_unfold(Cursor::Start, move |cursor| async move {
            let cursor = match cursor {
                Cursor::Done => return Ok::<_, AppError>(None),
                Cursor::Start => None,
                Cursor::Next(next) => Some(next),
            };

            let page = self.index.browse(name, cursor.as_deref()).await?;
            let next = match page.cursor {
                Some(next) => Cursor::Next(next),
                None => Cursor::Done,
            };
            let hits = stream::iter(page.hits.into_iter().map(Ok::<Value, AppError>));
            Ok(Some((hits, next)))
        })
        .try_flatten()
        .boxed()
    }

    /// Submit one batch and wait for every task it spawned.
    pub async fn submit_batch(&self, operations: &[BatchOperation]) -> Result<()> {
        if operations.is_empty() {
            return Ok(());
        }

        let response = self
            .index
            .batch(operations)
            .await
            .map_err(|e| logged("batch", &targets(operations), e))?;

        future::try_join_all(
            response
                .task_ids
                .iter()
                .map(|(collection, task)| self.wait(collection, *task)),
        )
        .await?;
        Ok(())
    }

    async fn wait(&self, name: &str, task: TaskId) -> Result<()> {
        self.index
            .wait_task(name, task)
            .await
            .map_err(|e| logged("wait_task", name, e))
    }
}

/// Log a failed verb and attach the operation and collection to the error.
fn logged(operation: &'static str, collection: &str, error: AppError) -> AppError {
    log::error!("{} on '{}' failed: {}", operation, collection, error);
    match error {
        e @ (AppError::Remote { .. } | AppError::Task { .. }) => e,
        other => AppError::remote(operation, collection, other),
    }
}

/// Comma-separated distinct collections targeted by a batch.
fn targets(operations: &[BatchOperation]) -> String {
    let mut names: Vec<&str> = operations.iter().map(BatchOperation::collection).collect();
    names.sort_unstable();
    names.dedup();
    names.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(memory: &Arc<MemoryIndex>) -> RemoteIndexClient {
        RemoteIndexClient::new(memory.clone())
    }

    #[tokio::test]
    async fn test_copy_of_missing_source_creates_empty_destination() {
        let memory = Arc::new(MemoryIndex::new());
        client(&memory)
            .copy_collection("idx", "idx_tmp")
            .await
            .unwrap();

        let calls = memory.calls();
        assert!(calls.contains(&"set_settings idx_tmp".to_string()));
        assert!(calls.contains(&"clear idx_tmp".to_string()));
        assert!(!calls.iter().any(|c| c.starts_with("copy")));
        assert_eq!(memory.settings("idx_tmp"), Some(json!({})));
    }

    #[tokio::test]
    async fn test_copy_of_missing_source_drops_leftover_documents() {
        let memory = Arc::new(MemoryIndex::new());
        memory.insert_documents("idx_tmp", vec![json!({ "objectID": "stale" })]);

        client(&memory)
            .copy_collection("idx", "idx_tmp")
            .await
            .unwrap();

        assert!(memory.exists("idx_tmp"));
        assert!(memory.document_ids("idx_tmp").is_empty());
    }

    #[tokio::test]
    async fn test_copy_of_existing_source_uses_copy_verb() {
        let memory = Arc::new(MemoryIndex::new());
        memory.insert_documents("idx", vec![json!({ "objectID": "a" })]);

        client(&memory)
            .copy_collection("idx", "idx_tmp")
            .await
            .unwrap();

        assert!(memory.calls().contains(&"copy idx -> idx_tmp".to_string()));
        assert_eq!(memory.document_ids("idx_tmp"), vec!["a"]);
    }

    #[tokio::test]
    async fn test_collection_exists() {
        let memory = Arc::new(MemoryIndex::new());
        memory.insert_documents("idx", vec![]);

        assert!(client(&memory).collection_exists("idx").await);
        assert!(!client(&memory).collection_exists("other").await);
    }

    #[tokio::test]
    async fn test_settings_read_failure_reads_as_missing() {
        let memory = Arc::new(MemoryIndex::new());
        memory.insert_documents("idx", vec![]);
        memory.fail_on("get_settings", "idx");

        assert!(!client(&memory).collection_exists("idx").await);
        assert!(matches!(
            memory.get_settings("other").await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_browse_all_walks_every_page() {
        let memory = Arc::new(MemoryIndex::new().with_page_size(2));
        memory.insert_documents(
            "idx",
            (0..5).map(|i| json!({ "objectID": format!("doc{i}") })).collect(),
        );

        let client = client(&memory);
        let docs: Vec<Value> = client.browse_all("idx").try_collect().await.unwrap();

        assert_eq!(docs.len(), 5);
        let browses = memory
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("browse"))
            .count();
        assert_eq!(browses, 3);
    }

    #[tokio::test]
    async fn test_browse_all_is_lazy() {
        let memory = Arc::new(MemoryIndex::new());
        let client = client(&memory);

        let stream = client.browse_all("idx");
        assert!(memory.calls().is_empty());
        drop(stream);
    }

    #[tokio::test]
    async fn test_browse_all_surfaces_errors() {
        let memory = Arc::new(MemoryIndex::new());
        let client = client(&memory);

        let result: Result<Vec<Value>> = client.browse_all("missing").try_collect().await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_failed_write_names_operation_and_collection() {
        let memory = Arc::new(MemoryIndex::new());
        memory.fail_on("clear", "idx_manifest_tmp");

        let err = client(&memory)
            .clear_collection("idx_manifest_tmp")
            .await
            .unwrap_err();

        match err {
            AppError::Remote {
                operation,
                collection,
                ..
            } => {
                assert_eq!(operation, "clear");
                assert_eq!(collection, "idx_manifest_tmp");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_submit_batch_waits_on_each_collection() {
        let memory = Arc::new(MemoryIndex::new());
        let operations = vec![
            BatchOperation::add("a", json!({ "objectID": "1" })),
            BatchOperation::add("b", json!({ "objectID": "2" })),
            BatchOperation::delete("a", "3"),
        ];

        client(&memory).submit_batch(&operations).await.unwrap();

        let waits: Vec<String> = memory
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("wait_task"))
            .collect();
        assert_eq!(waits.len(), 2);
        assert_eq!(targets(&operations), "a, b");
    }
}
