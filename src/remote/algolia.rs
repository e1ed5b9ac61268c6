//! Algolia REST implementation of [`RemoteIndex`].
//!
//! Writes go to `https://{app_id}.algolia.net`, reads to the DSN host
//! `https://{app_id}-dsn.algolia.net`. Every write answers with a `taskID`
//! that is polled on `/1/indexes/{name}/task/{id}` until `published`.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{AlgoliaConfig, BatchOperation, OBJECT_ID};
use crate::remote::{BatchResponse, BrowsePage, RemoteIndex, TaskId};

/// Algolia-backed remote index.
#[derive(Clone)]
pub struct AlgoliaIndex {
    client: Client,
    read_host: Url,
    write_host: Url,
    poll_interval: Duration,
    browse_page_size: usize,
}

#[derive(Debug, Deserialize)]
struct TaskResponse {
    #[serde(rename = "taskID")]
    task_id: TaskId,
}

#[derive(Debug, Deserialize)]
struct MultiBatchResponse {
    #[serde(rename = "taskID")]
    task_id: BTreeMap<String, TaskId>,
    #[serde(rename = "objectIDs", default)]
    object_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TaskStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct BrowseResponse {
    #[serde(default)]
    hits: Vec<Value>,
    #[serde(default)]
    cursor: Option<String>,
}

impl AlgoliaIndex {
    /// Create a client for the application described by `config`.
    pub fn new(config: &AlgoliaConfig) -> Result<Self> {
        let read_host = Url::parse(&format!("https://{}-dsn.algolia.net", config.app_id))?;
        let write_host = Url::parse(&format!("https://{}.algolia.net", config.app_id))?;
        Self::with_hosts(config, read_host, write_host)
    }

    /// Create a client against explicit hosts (proxies, compatible engines).
    pub fn with_hosts(config: &AlgoliaConfig, read_host: Url, write_host: Url) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-algolia-application-id",
            HeaderValue::from_str(&config.app_id)
                .map_err(|e| AppError::config(format!("invalid algolia.app_id: {e}")))?,
        );
        headers.insert(
            "x-algolia-api-key",
            HeaderValue::from_str(&config.api_key)
                .map_err(|e| AppError::config(format!("invalid algolia.api_key: {e}")))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            read_host,
            write_host,
            poll_interval: Duration::from_millis(config.task_poll_interval_ms),
            browse_page_size: config.browse_page_size,
        })
    }

    /// Send a request and decode its JSON answer, mapping HTTP failures.
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &'static str,
        collection: &str,
    ) -> Result<T> {
        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(AppError::not_found(collection));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::remote(
                operation,
                collection,
                format!("HTTP {status}: {body}"),
            ));
        }
        Ok(response.json().await?)
    }

    async fn operation(
        &self,
        kind: &'static str,
        source: &str,
        destination: &str,
    ) -> Result<TaskId> {
        let url = endpoint(&self.write_host, &["1", "indexes", source, "operation"])?;
        let body = json!({ "operation": kind, "destination": destination });
        let response: TaskResponse = self
            .send(self.client.post(url).json(&body), kind, destination)
            .await?;
        Ok(response.task_id)
    }
}

/// Build `{host}/{segments...}` with each segment percent-encoded.
fn endpoint(host: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = host.clone();
    url.path_segments_mut()
        .map_err(|_| AppError::config(format!("{host} cannot be a base URL")))?
        .clear()
        .extend(segments);
    Ok(url)
}

/// Encode operations as a multi-index batch request body.
fn batch_body(operations: &[BatchOperation]) -> Value {
    let requests: Vec<Value> = operations
        .iter()
        .map(|operation| match operation {
            BatchOperation::AddDocument { collection, body } => json!({
                "action": "addObject",
                "indexName": collection,
                "body": body,
            }),
            BatchOperation::DeleteDocument {
                collection,
                object_id,
            } => json!({
                "action": "deleteObject",
                "indexName": collection,
                "body": { OBJECT_ID: object_id },
            }),
        })
        .collect();
    json!({ "requests": requests })
}

#[async_trait]
impl RemoteIndex for AlgoliaIndex {
    async fn copy_index(&self, source: &str, destination: &str) -> Result<TaskId> {
        self.operation("copy", source, destination).await
    }

    async fn move_index(&self, source: &str, destination: &str) -> Result<TaskId> {
        self.operation("move", source, destination).await
    }

    async fn clear_index(&self, name: &str) -> Result<TaskId> {
        let url = endpoint(&self.write_host, &["1", "indexes", name, "clear"])?;
        let response: TaskResponse = self.send(self.client.post(url), "clear", name).await?;
        Ok(response.task_id)
    }

    async fn set_settings(&self, name: &str, settings: &Value) -> Result<TaskId> {
        let url = endpoint(&self.write_host, &["1", "indexes", name, "settings"])?;
        let response: TaskResponse = self
            .send(self.client.put(url).json(settings), "set_settings", name)
            .await?;
        Ok(response.task_id)
    }

    async fn get_settings(&self, name: &str) -> Result<Value> {
        let url = endpoint(&self.read_host, &["1", "indexes", name, "settings"])?;
        self.send(self.client.get(url), "get_settings", name).await
    }

    async fn browse(&self, name: &str, cursor: Option<&str>) -> Result<BrowsePage> {
        let url = endpoint(&self.read_host, &["1", "indexes", name, "browse"])?;
        let body = match cursor {
            Some(cursor) => json!({ "cursor": cursor }),
            None => json!({ "hitsPerPage": self.browse_page_size }),
        };
        let response: BrowseResponse = self
            .send(self.client.post(url).json(&body), "browse", name)
            .await?;
        Ok(BrowsePage {
            hits: response.hits,
            cursor: response.cursor,
        })
    }

    async fn batch(&self, operations: &[BatchOperation]) -> Result<BatchResponse> {
        let url = endpoint(&self.write_host, &["1", "indexes", "*", "batch"])?;
        let body = batch_body(operations);
        let response: MultiBatchResponse = self
            .send(self.client.post(url).json(&body), "batch", "*")
            .await?;
        Ok(BatchResponse {
            task_ids: response.task_id,
            object_ids: response.object_ids,
        })
    }

    async fn wait_task(&self, name: &str, task_id: TaskId) -> Result<()> {
        let url = endpoint(
            &self.write_host,
            &["1", "indexes", name, "task", &task_id.to_string()],
        )?;

        loop {
            let status: TaskStatus = self
                .send(self.client.get(url.clone()), "wait_task", name)
                .await
                .map_err(|e| AppError::task(name, task_id, e))?;
            if status.status == "published" {
                return Ok(());
            }
            log::debug!("Task {} on '{}' is {}", task_id, name, status.status);
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}
