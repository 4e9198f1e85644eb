//! Change Data Capture iterator built on a MongoDB change stream.

use crate::codec;
use crate::error::{Error, Result};
use crate::record::{Metadata, Payload, Record};
use crate::source::position::Position;
use bson::{doc, Document};
use chrono::Utc;
use mongodb::change_stream::event::{ChangeStreamEvent, OperationType, ResumeToken};
use mongodb::change_stream::ChangeStream;
use mongodb::options::{ChangeStreamOptions, FullDocumentType};
use mongodb::Collection;

const OPERATION_TYPE_INSERT: &str = "insert";
const OPERATION_TYPE_UPDATE: &str = "update";
const OPERATION_TYPE_DELETE: &str = "delete";

/// Cosmos DB's API for MongoDB rejects change streams that are not shaped as
/// a `$match` followed by a `$project` stage, and reports it with this
/// message. The server exposes no stable error code for the condition, so
/// the message fragment is matched as a last resort; callers treat it as
/// "change streams unavailable" and fall back to polling.
pub(crate) const CHANGE_STREAM_PIPELINE_REQUIRED_MARKER: &str =
    "Change stream must be followed by a match and then a project stage";

/// True when an engine error indicates the server cannot serve the change
/// stream shape this connector uses.
pub(crate) fn is_pipeline_required_error(err: &Error) -> bool {
    match err {
        Error::Engine { source, .. } => message_indicates_pipeline_required(&source.to_string()),
        _ => false,
    }
}

pub(crate) fn message_indicates_pipeline_required(message: &str) -> bool {
    message.contains(CHANGE_STREAM_PIPELINE_REQUIRED_MARKER)
}

// Filters the stream down to the three event types the connector handles.
fn event_filter_pipeline() -> Vec<Document> {
    vec![doc! {
        "$match": {
            "operationType": {
                "$in": [
                    OPERATION_TYPE_INSERT,
                    OPERATION_TYPE_UPDATE,
                    OPERATION_TYPE_DELETE,
                ],
            },
        },
    }]
}

/// A CDC iterator tailing one collection's change stream.
pub(crate) struct Cdc {
    stream: Option<ChangeStream<ChangeStreamEvent<Document>>>,
    pending: Option<ChangeStreamEvent<Document>>,
    collection_name: String,
}

impl Cdc {
    /// Open a change stream on the collection, resuming after `resume_token`
    /// when one is provided and starting from the current server time
    /// otherwise. Updates carry the post-image of the document.
    pub(crate) async fn new(
        collection: &Collection<Document>,
        resume_token: Option<&[u8]>,
    ) -> Result<Self> {
        let mut options = ChangeStreamOptions::builder()
            .full_document(Some(FullDocumentType::UpdateLookup))
            .build();

        if let Some(bytes) = resume_token {
            let token = bson::from_slice::<ResumeToken>(bytes).map_err(|e| {
                Error::ParsePosition(format!(
                    "invalid resume token: {e}. The token may be corrupted or \
                     from an incompatible MongoDB version"
                ))
            })?;
            options.resume_after = Some(token);
        }

        let stream = collection
            .watch()
            .pipeline(event_filter_pipeline())
            .with_options(options)
            .await
            .map_err(|e| Error::engine("create change stream", e))?;

        Ok(Self {
            stream: Some(stream),
            pending: None,
            collection_name: collection.name().to_string(),
        })
    }

    /// The stream's current position as raw token bytes. Captured right after
    /// creation, this anchors a snapshot's eventual handoff to CDC.
    pub(crate) fn resume_token_bytes(&self) -> Result<Vec<u8>> {
        let stream = self.stream.as_ref().ok_or(Error::NoIterator)?;

        match stream.resume_token() {
            Some(token) => {
                bson::to_vec(&token).map_err(|e| Error::SerializePosition(e.to_string()))
            }
            None => Err(Error::NoResumeToken),
        }
    }

    /// Poll the stream without blocking. Returns `false` when no event is
    /// pending, in which case the caller backs off and retries.
    pub(crate) async fn has_next(&mut self) -> Result<bool> {
        if self.pending.is_some() {
            return Ok(true);
        }

        let stream = self.stream.as_mut().ok_or(Error::NoIterator)?;
        match stream
            .next_if_any()
            .await
            .map_err(|e| Error::engine("poll change stream", e))?
        {
            Some(event) => {
                self.pending = Some(event);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Return the buffered event as a record. Must be preceded by a
    /// `has_next` that returned `true`.
    pub(crate) fn next(&mut self) -> Result<Record> {
        let event = self.pending.take().ok_or(Error::BackoffRetry)?;
        event_to_record(&self.collection_name, event)
    }

    /// Close the stream. Idempotent; dropping the handle releases the
    /// server-side cursor.
    pub(crate) async fn stop(&mut self) -> Result<()> {
        if self.stream.take().is_some() {
            tracing::debug!("closed change stream");
        }
        self.pending = None;

        Ok(())
    }
}

// Convert a change stream event to a record: the event id becomes the
// position's resume token, the wall time and namespace become metadata, and
// the operation type picks the record shape.
fn event_to_record(
    default_collection: &str,
    event: ChangeStreamEvent<Document>,
) -> Result<Record> {
    let resume_token =
        bson::to_vec(&event.id).map_err(|e| Error::SerializePosition(e.to_string()))?;
    let position = Position::Cdc { resume_token }.encode()?;

    let collection = event
        .ns
        .as_ref()
        .and_then(|ns| ns.coll.clone())
        .unwrap_or_else(|| default_collection.to_string());
    let created_at = event
        .wall_time
        .map(|t| t.to_chrono())
        .unwrap_or_else(Utc::now);
    let metadata = Metadata {
        collection,
        created_at,
    };

    let key = codec::document_to_structured(event.document_key.clone().ok_or_else(|| {
        Error::DecodeDocument("change stream event has no document key".to_string())
    })?)?;

    match event.operation_type {
        OperationType::Insert => {
            let after = codec::document_to_structured(event.full_document.unwrap_or_default())?;
            Ok(Record::create(
                position,
                metadata,
                key,
                Payload::Structured(after),
            ))
        }

        OperationType::Update => {
            // The post-image can be missing when the document was deleted
            // before the update lookup ran; the record is still emitted.
            let after = codec::document_to_structured(event.full_document.unwrap_or_default())?;
            Ok(Record::update(
                position,
                metadata,
                key,
                None,
                Payload::Structured(after),
            ))
        }

        OperationType::Delete => Ok(Record::delete(position, metadata, key)),

        // The pipeline filter admits only the three types above.
        other => Err(Error::UnsupportedOperationType(format!("{other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Operation, Value, ID_FIELD};

    fn insert_event_doc() -> Document {
        doc! {
            "_id": { "_data": "826400000000000000012B022C0100296E5A1004" },
            "operationType": "insert",
            "ns": { "db": "test", "coll": "users" },
            "documentKey": { "_id": "a" },
            "fullDocument": { "_id": "a", "v": 1i64 },
            "wallTime": bson::DateTime::from_millis(1_700_000_000_000),
        }
    }

    #[test]
    fn test_insert_event_becomes_create_record() {
        let event: ChangeStreamEvent<Document> =
            bson::from_document(insert_event_doc()).unwrap();

        let record = event_to_record("users", event).unwrap();

        assert_eq!(record.operation, Operation::Create);
        assert_eq!(
            record.key.get(ID_FIELD),
            Some(&Value::String("a".to_string()))
        );
        assert_eq!(record.metadata.collection, "users");
        assert_eq!(
            record.metadata.created_at.timestamp_millis(),
            1_700_000_000_000
        );

        match record.payload_after {
            Some(Payload::Structured(after)) => {
                assert_eq!(after.get("v"), Some(&Value::Int64(1)));
            }
            other => panic!("expected structured after-payload, got {other:?}"),
        }

        // The emitted position resumes the stream right after this event.
        let position = Position::decode(&record.position).unwrap().unwrap();
        assert!(matches!(position, Position::Cdc { ref resume_token } if !resume_token.is_empty()));
    }

    #[test]
    fn test_delete_event_has_no_after_payload() {
        let mut event_doc = insert_event_doc();
        event_doc.insert("operationType", "delete");
        event_doc.remove("fullDocument");

        let event: ChangeStreamEvent<Document> = bson::from_document(event_doc).unwrap();
        let record = event_to_record("users", event).unwrap();

        assert_eq!(record.operation, Operation::Delete);
        assert!(record.payload_after.is_none());
    }

    #[test]
    fn test_unsupported_operation_type_is_rejected() {
        let mut event_doc = insert_event_doc();
        event_doc.insert("operationType", "drop");
        event_doc.remove("documentKey");
        event_doc.insert("documentKey", doc! { "_id": "a" });

        let event: ChangeStreamEvent<Document> = bson::from_document(event_doc).unwrap();

        assert!(matches!(
            event_to_record("users", event),
            Err(Error::UnsupportedOperationType(_))
        ));
    }

    #[test]
    fn test_pipeline_marker_detection() {
        assert!(message_indicates_pipeline_required(
            "Error: Change stream must be followed by a match and then a project stage (code 40602)"
        ));
        assert!(!message_indicates_pipeline_required(
            "connection refused"
        ));
    }
}
