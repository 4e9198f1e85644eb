//! Conversions between BSON documents and the canonical record model.
//!
//! Reading normalizes typed object-ids to their 24-character hex strings so
//! keys and payloads are plain structured data. Writing reverses that: map
//! fields named `_id` whose string value parses as an object-id are emitted
//! as the typed object-id, and key filters coerce every eligible string, so
//! a read-then-write cycle round-trips `_id` representations.

use crate::error::{Error, Result};
use crate::record::{StructuredData, Value, ID_FIELD};
use bson::oid::ObjectId;
use bson::{Bson, Document};

/// Convert a BSON value to a canonical [`Value`].
///
/// Object-ids are rendered as their hex strings. Types outside the canonical
/// universe are a data error rather than being silently dropped.
pub fn bson_to_value(value: Bson) -> Result<Value> {
    match value {
        Bson::Null => Ok(Value::Null),
        Bson::Boolean(b) => Ok(Value::Bool(b)),
        Bson::Int32(i) => Ok(Value::Int64(i64::from(i))),
        Bson::Int64(i) => Ok(Value::Int64(i)),
        Bson::Double(f) => Ok(Value::Float64(f)),
        Bson::String(s) => Ok(Value::String(s)),
        Bson::ObjectId(oid) => Ok(Value::String(oid.to_hex())),
        Bson::Binary(binary) => Ok(Value::Bytes(binary.bytes)),
        Bson::DateTime(dt) => Ok(Value::Timestamp(dt.to_chrono())),
        Bson::Timestamp(ts) => {
            // The increment component keeps ordering across operations that
            // share a wall-clock second.
            let datetime = chrono::DateTime::from_timestamp(i64::from(ts.time), ts.increment)
                .ok_or_else(|| {
                    Error::DecodeDocument(format!("timestamp out of range: {ts:?}"))
                })?;
            Ok(Value::Timestamp(datetime))
        }
        Bson::Document(doc) => Ok(Value::Map(document_to_structured(doc)?)),
        Bson::Array(items) => {
            let mut sequence = Vec::with_capacity(items.len());
            for item in items {
                sequence.push(bson_to_value(item)?);
            }
            Ok(Value::Sequence(sequence))
        }
        other => Err(Error::UnsupportedType(format!("{:?}", other.element_type()))),
    }
}

/// Convert a BSON document to structured data, normalizing object-ids.
pub fn document_to_structured(doc: Document) -> Result<StructuredData> {
    let mut data = StructuredData::with_capacity(doc.len());
    for (field, value) in doc {
        data.insert(field, bson_to_value(value)?);
    }
    Ok(data)
}

/// Convert a canonical [`Value`] to BSON for writing.
///
/// Nested maps run each field through the `_id` object-id adapter.
pub fn value_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(*b),
        Value::Int64(i) => Bson::Int64(*i),
        Value::Float64(f) => Bson::Double(*f),
        Value::String(s) => Bson::String(s.clone()),
        Value::Bytes(bytes) => Bson::Binary(bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: bytes.clone(),
        }),
        Value::Timestamp(dt) => Bson::DateTime(bson::DateTime::from_chrono(*dt)),
        Value::Map(map) => {
            let mut doc = Document::new();
            for (field, val) in map {
                doc.insert(field.clone(), encode_field(field, val));
            }
            Bson::Document(doc)
        }
        Value::Sequence(items) => Bson::Array(items.iter().map(value_to_bson).collect()),
    }
}

/// Convert structured data to a BSON document ready for insertion.
pub fn structured_to_document(data: &StructuredData) -> Document {
    let mut doc = Document::new();
    for (field, value) in data {
        doc.insert(field.clone(), encode_field(field, value));
    }
    doc
}

// String `_id` fields that parse as an object-id are written as the typed
// object-id; everything else passes through unchanged. This is the sole
// mechanism by which string-typed `_id`s round-trip.
fn encode_field(field: &str, value: &Value) -> Bson {
    if field == ID_FIELD {
        if let Value::String(s) = value {
            if let Ok(oid) = ObjectId::parse_str(s) {
                return Bson::ObjectId(oid);
            }
        }
    }

    value_to_bson(value)
}

/// Build a query filter from a record key, coercing every string value that
/// is a valid object-id hex so comparisons match typed `_id`s in storage.
pub fn filter_from_key(key: &StructuredData) -> Document {
    let mut filter = Document::new();
    for (field, value) in key {
        filter.insert(field.clone(), coerce_object_id(value));
    }
    filter
}

/// Convert a value for a range or equality comparison against the
/// collection's native ordering: 24-character hex strings become typed
/// object-ids, anything else is used as-is.
pub fn coerce_object_id(value: &Value) -> Bson {
    if let Value::String(s) = value {
        if let Ok(oid) = ObjectId::parse_str(s) {
            return Bson::ObjectId(oid);
        }
    }

    value_to_bson(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    const HEX_ID: &str = "507f1f77bcf86cd799439011";

    #[test]
    fn test_object_id_normalized_to_hex_string() {
        let oid = ObjectId::parse_str(HEX_ID).unwrap();
        let data = document_to_structured(doc! { "_id": oid, "n": 1 }).unwrap();

        assert_eq!(data.get("_id"), Some(&Value::String(HEX_ID.to_string())));
        assert_eq!(data.get("n"), Some(&Value::Int64(1)));
    }

    #[test]
    fn test_nested_documents_and_arrays() {
        let data = document_to_structured(doc! {
            "name": "a",
            "nested": { "flag": true, "ratio": 0.5 },
            "tags": ["x", 2i64],
        })
        .unwrap();

        match data.get("nested") {
            Some(Value::Map(nested)) => {
                assert_eq!(nested.get("flag"), Some(&Value::Bool(true)));
                assert_eq!(nested.get("ratio"), Some(&Value::Float64(0.5)));
            }
            other => panic!("expected nested map, got {other:?}"),
        }
        assert_eq!(
            data.get("tags"),
            Some(&Value::Sequence(vec![
                Value::String("x".to_string()),
                Value::Int64(2),
            ]))
        );
    }

    #[test]
    fn test_int32_widens_to_int64() {
        assert_eq!(bson_to_value(Bson::Int32(7)).unwrap(), Value::Int64(7));
    }

    #[test]
    fn test_datetime_converts_to_timestamp() {
        let millis = 1_700_000_000_000;
        let value = bson_to_value(Bson::DateTime(bson::DateTime::from_millis(millis))).unwrap();

        match value {
            Value::Timestamp(dt) => assert_eq!(dt.timestamp_millis(), millis),
            other => panic!("expected timestamp, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_type_is_a_data_error() {
        let regex = Bson::RegularExpression(bson::Regex {
            pattern: "^a".to_string(),
            options: "i".to_string(),
        });

        assert!(matches!(
            bson_to_value(regex),
            Err(Error::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_id_field_coerced_on_write() {
        let mut data = StructuredData::new();
        data.insert(ID_FIELD.to_string(), Value::String(HEX_ID.to_string()));
        data.insert("n".to_string(), Value::Int64(1));

        let doc = structured_to_document(&data);

        assert_eq!(
            doc.get(ID_FIELD),
            Some(&Bson::ObjectId(ObjectId::parse_str(HEX_ID).unwrap()))
        );
        assert_eq!(doc.get("n"), Some(&Bson::Int64(1)));
    }

    #[test]
    fn test_non_hex_id_passes_through() {
        let mut data = StructuredData::new();
        data.insert(ID_FIELD.to_string(), Value::String("user-42".to_string()));

        let doc = structured_to_document(&data);

        assert_eq!(doc.get(ID_FIELD), Some(&Bson::String("user-42".to_string())));
    }

    #[test]
    fn test_hex_string_outside_id_field_stays_a_string() {
        let mut data = StructuredData::new();
        data.insert("ref".to_string(), Value::String(HEX_ID.to_string()));

        let doc = structured_to_document(&data);

        assert_eq!(doc.get("ref"), Some(&Bson::String(HEX_ID.to_string())));
    }

    #[test]
    fn test_filter_coerces_every_eligible_value() {
        let mut key = StructuredData::new();
        key.insert(ID_FIELD.to_string(), Value::String(HEX_ID.to_string()));
        key.insert("shard".to_string(), Value::String("eu".to_string()));

        let filter = filter_from_key(&key);

        assert_eq!(
            filter.get(ID_FIELD),
            Some(&Bson::ObjectId(ObjectId::parse_str(HEX_ID).unwrap()))
        );
        assert_eq!(filter.get("shard"), Some(&Bson::String("eu".to_string())));
    }

    #[test]
    fn test_coerce_object_id_leaves_other_types_alone() {
        assert_eq!(coerce_object_id(&Value::Int64(5)), Bson::Int64(5));
        assert_eq!(
            coerce_object_id(&Value::String("short".to_string())),
            Bson::String("short".to_string())
        );
    }
}
