//! Manifest ledger of the identifiers live in production.
//!
//! The remote service has no cheap "list all identifiers" primitive, so the
//! identifiers of every synced record are stored alongside production in a
//! side collection, bucketed so that neither the write count (one document
//! per identifier) nor the per-document size limit (one document for all of
//! them) explodes.

use futures::TryStreamExt;
use serde_json::Value;

use crate::error::Result;
use crate::models::{BatchOperation, ManifestEntry, Record};
use crate::remote::RemoteIndexClient;

/// Identifiers stored per manifest document.
pub const DEFAULT_BUCKET_SIZE: usize = 100;

/// Reads and rebuilds the manifest collections.
#[derive(Clone)]
pub struct ManifestStore {
    client: RemoteIndexClient,
    bucket_size: usize,
}

impl ManifestStore {
    pub fn new(client: RemoteIndexClient) -> Self {
        Self::with_bucket_size(client, DEFAULT_BUCKET_SIZE)
    }

    pub fn with_bucket_size(client: RemoteIndexClient, bucket_size: usize) -> Self {
        Self {
            client,
            bucket_size: bucket_size.max(1),
        }
    }

    /// Flatten every manifest entry of `collection` into one identifier list.
    ///
    /// A missing collection (first sync) yields an empty list.
    pub async fn get_remote_object_ids(&self, collection: &str) -> Result<Vec<String>> {
        if !self.client.collection_exists(collection).await {
            log::info!("No manifest at '{}' yet, starting from scratch", collection);
            return Ok(Vec::new());
        }

        let entries: Vec<Value> = self.client.browse_all(collection).try_collect().await?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry: ManifestEntry = serde_json::from_value(entry)?;
            ids.extend(entry.content);
        }

        log::debug!("Manifest '{}' lists {} identifiers", collection, ids.len());
        Ok(ids)
    }

    /// One add operation per bucket of record identifiers.
    pub fn build_manifest_batch(&self, records: &[Record], collection: &str) -> Vec<BatchOperation> {
        build_manifest_batch(records, collection, self.bucket_size)
    }
}

/// Bucket the identifiers of `records` into manifest documents.
///
/// Buckets are named `manifest-{n}` after their position; the staging
/// manifest is cleared before they are written.
pub fn build_manifest_batch(
    records: &[Record],
    collection: &str,
    bucket_size: usize,
) -> Vec<BatchOperation> {
    records
        .chunks(bucket_size.max(1))
        .enumerate()
        .map(|(position, bucket)| {
            let entry = ManifestEntry {
                object_id: format!("manifest-{position}"),
                content: bucket.iter().map(|r| r.object_id.clone()).collect(),
            };
            BatchOperation::add(collection, manifest_document(&entry))
        })
        .collect()
}

fn manifest_document(entry: &ManifestEntry) -> Value {
    serde_json::json!({
        "objectID": entry.object_id,
        "content": entry.content,
    })
}
