//! Search record data structure.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

/// Field name carrying the record identifier.
pub const OBJECT_ID: &str = "objectID";

/// One flattened, denormalized search document.
///
/// Produced upstream (one caption slice of one video joined with its
/// video/playlist/channel/speaker/conference metadata); the sync engine only
/// reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Stable identifier, a content hash unless supplied upstream
    #[serde(rename = "objectID")]
    pub object_id: String,

    /// Searchable and facetable attributes
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Record {
    /// Build a record whose identifier is the hash of its content.
    pub fn from_fields(mut fields: Map<String, Value>) -> Self {
        fields.remove(OBJECT_ID);
        let object_id = content_hash(&fields);
        Self { object_id, fields }
    }

    /// Build a record keeping an identifier assigned upstream.
    pub fn with_object_id(object_id: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        fields.remove(OBJECT_ID);
        Self {
            object_id: object_id.into(),
            fields,
        }
    }

    /// Convert an arbitrary JSON object into a record.
    ///
    /// A string `objectID` is kept as-is; otherwise one is derived from the
    /// content.
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(AppError::validation("record is not a JSON object"));
        };

        match fields.get(OBJECT_ID) {
            Some(Value::String(id)) if !id.is_empty() => {
                let id = id.clone();
                Ok(Self::with_object_id(id, fields))
            }
            Some(Value::String(_)) | None => Ok(Self::from_fields(fields)),
            Some(other) => Err(AppError::validation(format!(
                "objectID must be a string, got {other}"
            ))),
        }
    }

    /// The JSON document pushed to the index.
    pub fn to_document(&self) -> Value {
        let mut document = self.fields.clone();
        document.insert(OBJECT_ID.to_string(), Value::String(self.object_id.clone()));
        Value::Object(document)
    }

    /// Load every record of a JSON array file.
    pub fn load_all(path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let content = fs::read_to_string(path)?;
        let values: Vec<Value> = serde_json::from_str(&content)?;
        values.into_iter().map(Self::from_value).collect()
    }
}

/// Lowercase hex SHA-256 of the canonical (key-sorted) JSON encoding.
pub fn content_hash(fields: &Map<String, Value>) -> String {
    // serde_json's default map keeps keys sorted, so the encoding is canonical
    let encoded = Value::Object(fields.clone()).to_string();
    hex::encode(Sha256::digest(encoded.as_bytes()))
}

/// Identifiers of the given records, in input order.
pub fn get_local_object_ids(records: &[Record]) -> Vec<String> {
    records.iter().map(|r| r.object_id.clone()).collect()
}
