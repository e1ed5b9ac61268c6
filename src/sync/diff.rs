//! Diff between the live identifiers and the local record set.
//!
//! Records whose identifier is already live are never re-sent: since the
//! identifier is a content hash, an unchanged identifier means unchanged
//! content, and sync cost stays proportional to the delta.

use std::collections::HashSet;

use crate::models::{BatchOperation, Record};

/// Identifiers to remove and records to add.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiffResult<'a> {
    /// Live identifiers absent locally, in remote order
    pub ids_to_delete: Vec<String>,
    /// Local records absent remotely, in local order
    pub records_to_add: Vec<&'a Record>,
}

impl DiffResult<'_> {
    /// Check if there are any changes.
    pub fn has_changes(&self) -> bool {
        !self.ids_to_delete.is_empty() || !self.records_to_add.is_empty()
    }

    /// Get the total number of changes.
    pub fn change_count(&self) -> usize {
        self.ids_to_delete.len() + self.records_to_add.len()
    }

    /// Identifiers of the records to add.
    pub fn ids_to_add(&self) -> Vec<&str> {
        self.records_to_add
            .iter()
            .map(|r| r.object_id.as_str())
            .collect()
    }

    /// Turn the diff into operations against `collection`, deletes first.
    pub fn into_operations(self, collection: &str) -> Vec<BatchOperation> {
        let deletes = self
            .ids_to_delete
            .into_iter()
            .map(|id| BatchOperation::delete(collection, id));
        let adds = self
            .records_to_add
            .into_iter()
            .map(|record| BatchOperation::add(collection, record.to_document()));
        deletes.chain(adds).collect()
    }
}

/// Compute both set differences, preserving input order within each group.
///
/// Duplicate identifiers on either side are emitted once.
pub fn calculate_diff<'a>(remote_ids: &[String], local_records: &'a [Record]) -> DiffResult<'a> {
    let remote: HashSet<&str> = remote_ids.iter().map(String::as_str).collect();
    let local: HashSet<&str> = local_records
        .iter()
        .map(|r| r.object_id.as_str())
        .collect();

    let mut seen = HashSet::new();
    let mut ids_to_delete = Vec::new();
    for id in remote_ids {
        if !local.contains(id.as_str()) && seen.insert(id.as_str()) {
            ids_to_delete.push(id.clone());
        }
    }

    let mut seen = HashSet::new();
    let mut records_to_add = Vec::new();
    for record in local_records {
        let id = record.object_id.as_str();
        if !remote.contains(id) && seen.insert(id) {
            records_to_add.push(record);
        }
    }

    DiffResult {
        ids_to_delete,
        records_to_add,
    }
}

/// Build the operations converging `target_collection` to the local records.
pub fn build_diff_batch(
    remote_ids: &[String],
    local_records: &[Record],
    target_collection: &str,
) -> Vec<BatchOperation> {
    calculate_diff(remote_ids, local_records).into_operations(target_collection)
}
