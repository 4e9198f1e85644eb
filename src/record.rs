//! The canonical record model exchanged with the streaming pipeline.
//!
//! A [`Record`] describes a single observed change: an operation tag, a
//! structured key, optional before/after payloads, metadata and an opaque
//! position the caller can hand back to resume reading.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The reserved primary key field of MongoDB documents.
pub const ID_FIELD: &str = "_id";

/// The operation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Snapshot,
    Create,
    Update,
    Delete,
}

/// A structured value in the canonical type universe.
///
/// Codec boundaries ([`crate::codec`]) are the only places where dispatch
/// between these variants and BSON happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Map(HashMap<String, Value>),
    Sequence(Vec<Value>),
}

/// A structured map keyed by field name.
pub type StructuredData = HashMap<String, Value>;

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int64(i)
                } else if let Some(f) = n.as_f64() {
                    Value::Float64(f)
                } else {
                    // Fallback to string representation for unusual number types
                    Value::String(n.to_string())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Map(
                fields
                    .into_iter()
                    .map(|(key, val)| (key, Value::from(val)))
                    .collect(),
            ),
        }
    }
}

/// A record payload: either already-structured data or raw bytes the host
/// pipeline serialized (interpreted as JSON when a structured view is needed).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    Structured(StructuredData),
    Raw(Vec<u8>),
}

impl Payload {
    /// Return the payload as structured data, parsing raw bytes as JSON.
    pub fn to_structured(&self) -> Result<StructuredData> {
        match self {
            Payload::Structured(data) => Ok(data.clone()),
            Payload::Raw(bytes) => {
                let parsed: HashMap<String, serde_json::Value> = serde_json::from_slice(bytes)
                    .map_err(|e| Error::DecodeDocument(format!("parse raw payload: {e}")))?;

                Ok(parsed
                    .into_iter()
                    .map(|(key, val)| (key, Value::from(val)))
                    .collect())
            }
        }
    }
}

/// Record metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    /// The collection the record originates from or is routed to.
    pub collection: String,
    /// The server-side time of the change, or the read time for snapshots.
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// A single change record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub operation: Operation,
    pub key: StructuredData,
    pub payload_before: Option<Payload>,
    pub payload_after: Option<Payload>,
    pub metadata: Metadata,
    /// Opaque resumable position, see [`crate::source::Position`].
    pub position: Vec<u8>,
}

impl Record {
    /// A record captured by the initial snapshot.
    pub fn snapshot(
        position: Vec<u8>,
        metadata: Metadata,
        key: StructuredData,
        payload_after: Payload,
    ) -> Self {
        Self {
            operation: Operation::Snapshot,
            key,
            payload_before: None,
            payload_after: Some(payload_after),
            metadata,
            position,
        }
    }

    /// A record for a newly inserted document.
    pub fn create(
        position: Vec<u8>,
        metadata: Metadata,
        key: StructuredData,
        payload_after: Payload,
    ) -> Self {
        Self {
            operation: Operation::Create,
            key,
            payload_before: None,
            payload_after: Some(payload_after),
            metadata,
            position,
        }
    }

    /// A record for an updated document.
    pub fn update(
        position: Vec<u8>,
        metadata: Metadata,
        key: StructuredData,
        payload_before: Option<Payload>,
        payload_after: Payload,
    ) -> Self {
        Self {
            operation: Operation::Update,
            key,
            payload_before,
            payload_after: Some(payload_after),
            metadata,
            position,
        }
    }

    /// A record for a deleted document. Carries no after-payload.
    pub fn delete(position: Vec<u8>, metadata: Metadata, key: StructuredData) -> Self {
        Self {
            operation: Operation::Delete,
            key,
            payload_before: None,
            payload_after: None,
            metadata,
            position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delete_record_has_no_after_payload() {
        let mut key = StructuredData::new();
        key.insert(ID_FIELD.to_string(), Value::String("a".to_string()));

        let record = Record::delete(
            vec![1, 2, 3],
            Metadata {
                collection: "users".to_string(),
                created_at: Utc::now(),
            },
            key.clone(),
        );

        assert_eq!(record.operation, Operation::Delete);
        assert_eq!(record.key, key);
        assert!(record.payload_after.is_none());
        assert!(record.payload_before.is_none());
        assert_eq!(record.position, vec![1, 2, 3]);
    }

    #[test]
    fn test_snapshot_record_carries_payload() {
        let mut key = StructuredData::new();
        key.insert(ID_FIELD.to_string(), Value::Int64(1));

        let mut payload = StructuredData::new();
        payload.insert(ID_FIELD.to_string(), Value::Int64(1));
        payload.insert("v".to_string(), Value::Int64(42));

        let record = Record::snapshot(
            vec![0],
            Metadata {
                collection: "users".to_string(),
                created_at: Utc::now(),
            },
            key,
            Payload::Structured(payload.clone()),
        );

        assert_eq!(record.operation, Operation::Snapshot);
        assert_eq!(record.payload_after, Some(Payload::Structured(payload)));
    }

    #[test]
    fn test_raw_payload_parses_as_json() {
        let payload = Payload::Raw(br#"{"_id":"a","v":1,"tags":["x","y"]}"#.to_vec());
        let structured = payload.to_structured().unwrap();

        assert_eq!(
            structured.get("_id"),
            Some(&Value::String("a".to_string()))
        );
        assert_eq!(structured.get("v"), Some(&Value::Int64(1)));
        assert_eq!(
            structured.get("tags"),
            Some(&Value::Sequence(vec![
                Value::String("x".to_string()),
                Value::String("y".to_string()),
            ]))
        );
    }

    #[test]
    fn test_raw_payload_rejects_malformed_json() {
        let payload = Payload::Raw(b"not json".to_vec());
        assert!(payload.to_structured().is_err());
    }

    #[test]
    fn test_json_number_conversion() {
        assert_eq!(Value::from(serde_json::json!(7)), Value::Int64(7));
        assert_eq!(Value::from(serde_json::json!(1.5)), Value::Float64(1.5));
        assert_eq!(Value::from(serde_json::json!(null)), Value::Null);
    }
}
