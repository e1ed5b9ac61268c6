//! In-process remote index.
//!
//! Mirrors the service semantics the sync engine depends on (copy, atomic
//! move, clear, settings, cursor browse, multi-collection batches) for
//! development and testing. Every verb is recorded so callers can assert on
//! the exact sequence of remote calls, and failures can be injected per verb
//! and collection.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{AppError, Result};
use crate::models::{BatchOperation, OBJECT_ID, merge_settings};
use crate::remote::{BatchResponse, BrowsePage, RemoteIndex, TaskId};

const DEFAULT_PAGE_SIZE: usize = 1000;

/// A single in-memory collection.
#[derive(Debug, Clone)]
pub struct MemoryCollection {
    pub settings: Value,
    /// Documents keyed by objectID
    pub documents: BTreeMap<String, Value>,
}

impl Default for MemoryCollection {
    fn default() -> Self {
        Self {
            settings: json!({}),
            documents: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: BTreeMap<String, MemoryCollection>,
    calls: Vec<String>,
    failures: Vec<(String, String)>,
}

/// In-memory [`RemoteIndex`] backend.
#[derive(Debug)]
pub struct MemoryIndex {
    state: Mutex<MemoryState>,
    page_size: usize,
    batch_latency: Option<Duration>,
    next_task: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            page_size: DEFAULT_PAGE_SIZE,
            batch_latency: None,
            next_task: AtomicU64::new(1),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Number of documents returned per browse page.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Delay every batch write, making concurrent writes observable.
    pub fn with_batch_latency(mut self, latency: Duration) -> Self {
        self.batch_latency = Some(latency);
        self
    }

    /// Make `verb` fail whenever it targets `collection`.
    pub fn fail_on(&self, verb: impl Into<String>, collection: impl Into<String>) {
        self.lock()
            .failures
            .push((verb.into(), collection.into()));
    }

    /// Stop injecting failures.
    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Seed a collection with documents, creating it if needed.
    pub fn insert_documents(&self, name: &str, documents: Vec<Value>) {
        let mut state = self.lock();
        let collection = state.collections.entry(name.to_string()).or_default();
        for document in documents {
            let id = object_id_of(&document).unwrap_or_default();
            collection.documents.insert(id, document);
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.lock().collections.contains_key(name)
    }

    /// Documents of a collection in identifier order.
    pub fn documents(&self, name: &str) -> Vec<Value> {
        self.lock()
            .collections
            .get(name)
            .map(|c| c.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Identifiers of a collection in sorted order.
    pub fn document_ids(&self, name: &str) -> Vec<String> {
        self.lock()
            .collections
            .get(name)
            .map(|c| c.documents.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn settings(&self, name: &str) -> Option<Value> {
        self.lock()
            .collections
            .get(name)
            .map(|c| c.settings.clone())
    }

    /// Every verb received so far, e.g. `"move idx_tmp -> idx"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Highest number of batch writes observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn task(&self) -> TaskId {
        self.next_task.fetch_add(1, Ordering::SeqCst)
    }

    /// Record a call, then fail if a matching failure was injected.
    fn record(
        state: &mut MemoryState,
        verb: &'static str,
        collection: &str,
        call: String,
    ) -> Result<()> {
        state.calls.push(call);
        let injected = state
            .failures
            .iter()
            .any(|(v, c)| v == verb && c == collection);
        if injected {
            return Err(AppError::remote(verb, collection, "injected failure"));
        }
        Ok(())
    }

    fn missing(name: &str) -> AppError {
        AppError::not_found(name)
    }
}

fn object_id_of(document: &Value) -> Option<String> {
    document
        .get(OBJECT_ID)
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl RemoteIndex for MemoryIndex {
    async fn copy_index(&self, source: &str, destination: &str) -> Result<TaskId> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            "copy",
            destination,
            format!("copy {source} -> {destination}"),
        )?;
        let copy = state
            .collections
            .get(source)
            .cloned()
            .ok_or_else(|| Self::missing(source))?;
        state.collections.insert(destination.to_string(), copy);
        Ok(self.task())
    }

    async fn move_index(&self, source: &str, destination: &str) -> Result<TaskId> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            "move",
            destination,
            format!("move {source} -> {destination}"),
        )?;
        let moved = state
            .collections
            .remove(source)
            .ok_or_else(|| Self::missing(source))?;
        state.collections.insert(destination.to_string(), moved);
        Ok(self.task())
    }

    async fn clear_index(&self, name: &str) -> Result<TaskId> {
        let mut state = self.lock();
        Self::record(&mut state, "clear", name, format!("clear {name}"))?;
        state
            .collections
            .entry(name.to_string())
            .or_default()
            .documents
            .clear();
        Ok(self.task())
    }

    async fn set_settings(&self, name: &str, settings: &Value) -> Result<TaskId> {
        let mut state = self.lock();
        Self::record(&mut state, "set_settings", name, format!("set_settings {name}"))?;
        let collection = state.collections.entry(name.to_string()).or_default();
        let current = std::mem::take(&mut collection.settings);
        collection.settings = merge_settings(current, settings);
        Ok(self.task())
    }

    async fn get_settings(&self, name: &str) -> Result<Value> {
        let mut state = self.lock();
        Self::record(&mut state, "get_settings", name, format!("get_settings {name}"))?;
        state
            .collections
            .get(name)
            .map(|c| c.settings.clone())
            .ok_or_else(|| Self::missing(name))
    }

    async fn browse(&self, name: &str, cursor: Option<&str>) -> Result<BrowsePage> {
        let mut state = self.lock();
        Self::record(&mut state, "browse", name, format!("browse {name}"))?;
        let collection = state
            .collections
            .get(name)
            .ok_or_else(|| Self::missing(name))?;

        let offset = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| AppError::remote("browse", name, "invalid cursor"))?,
            None => 0,
        };
        let hits: Vec<Value> = collection
            .documents
            .values()
            .skip(offset)
            .take(self.page_size)
            .cloned()
            .collect();
        let end = offset + hits.len();
        let cursor = (end < collection.documents.len()).then(|| end.to_string());

        Ok(BrowsePage { hits, cursor })
    }

    async fn batch(&self, operations: &[BatchOperation]) -> Result<BatchResponse> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        if let Some(latency) = self.batch_latency {
            tokio::time::sleep(latency).await;
        }

        let result = self.apply_batch(operations);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn wait_task(&self, name: &str, task_id: TaskId) -> Result<()> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            "wait_task",
            name,
            format!("wait_task {name} {task_id}"),
        )
        .map_err(|e| AppError::task(name, task_id, e))
    }
}

impl MemoryIndex {
    fn apply_batch(&self, operations: &[BatchOperation]) -> Result<BatchResponse> {
        let mut state = self.lock();

        // The whole request is rejected before anything is applied
        let mut collections: Vec<&str> = operations.iter().map(|op| op.collection()).collect();
        collections.sort_unstable();
        collections.dedup();
        for collection in &collections {
            Self::record(
                &mut state,
                "batch",
                collection,
                format!("batch {collection} ({} ops)", operations.len()),
            )?;
        }

        let mut response = BatchResponse::default();
        for operation in operations {
            let collection = state
                .collections
                .entry(operation.collection().to_string())
                .or_default();
            match operation {
                BatchOperation::AddDocument { body, .. } => {
                    let id = object_id_of(body)
                        .unwrap_or_else(|| format!("auto-{}", self.next_task.load(Ordering::SeqCst)));
                    collection.documents.insert(id.clone(), body.clone());
                    response.object_ids.push(id);
                }
                BatchOperation::DeleteDocument { object_id, .. } => {
                    collection.documents.remove(object_id);
                    response.object_ids.push(object_id.clone());
                }
            }
        }

        for collection in collections {
            response.task_ids.insert(collection.to_string(), self.task());
        }
        Ok(response)
    }
}
