//! Batch write operations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::record::OBJECT_ID;

/// One add-or-delete instruction targeting a collection.
///
/// Created by the diff and manifest builders, consumed exactly once by the
/// batch runner.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    /// Add (or replace) a document with this exact payload
    AddDocument { collection: String, body: Value },

    /// Delete the document with this identifier
    DeleteDocument {
        collection: String,
        object_id: String,
    },
}

impl BatchOperation {
    pub fn add(collection: impl Into<String>, body: Value) -> Self {
        Self::AddDocument {
            collection: collection.into(),
            body,
        }
    }

    pub fn delete(collection: impl Into<String>, object_id: impl Into<String>) -> Self {
        Self::DeleteDocument {
            collection: collection.into(),
            object_id: object_id.into(),
        }
    }

    /// Target collection name.
    pub fn collection(&self) -> &str {
        match self {
            Self::AddDocument { collection, .. } | Self::DeleteDocument { collection, .. } => {
                collection
            }
        }
    }

    /// Identifier of the document touched, if known.
    pub fn object_id(&self) -> Option<&str> {
        match self {
            Self::AddDocument { body, .. } => body.get(OBJECT_ID).and_then(Value::as_str),
            Self::DeleteDocument { object_id, .. } => Some(object_id),
        }
    }

    pub fn is_add(&self) -> bool {
        matches!(self, Self::AddDocument { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::DeleteDocument { .. })
    }
}

/// One document of the manifest collection: a bucket of live identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestEntry {
    #[serde(rename = "objectID")]
    pub object_id: String,

    /// Identifiers of documents present in production
    #[serde(default)]
    pub content: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_accessors() {
        let add = BatchOperation::add("talks_tmp", json!({ "objectID": "a", "x": 1 }));
        let del = BatchOperation::delete("talks_tmp", "b");

        assert_eq!(add.collection(), "talks_tmp");
        assert_eq!(add.object_id(), Some("a"));
        assert!(add.is_add());
        assert_eq!(del.object_id(), Some("b"));
        assert!(del.is_delete());
    }

    #[test]
    fn test_manifest_entry_tolerates_missing_content() {
        let entry: ManifestEntry = serde_json::from_value(json!({ "objectID": "m" })).unwrap();
        assert!(entry.content.is_empty());
    }
}
