//! Snapshot iterator: ordered, resumable cursor paging over a frozen
//! key-range of the collection.

use crate::codec;
use crate::error::{Error, Result};
use crate::record::{Metadata, Payload, Record, StructuredData, Value, ID_FIELD};
use crate::source::position::Position;
use bson::Document;
use chrono::Utc;
use mongodb::{Collection, Cursor};

/// A snapshot iterator over a single collection.
///
/// The window is bounded above by `max_element`, frozen when the snapshot
/// starts so that concurrent inserts do not extend it; those are picked up
/// by the change stream instead. Every emitted position carries the change
/// stream resume token captured at snapshot start, which lets CDC replay
/// from the snapshot's logical start time after the handoff.
pub(crate) struct Snapshot {
    collection: Collection<Document>,
    ordering_field: String,
    batch_size: u32,
    last_element: Option<Value>,
    max_element: Value,
    resume_token: Vec<u8>,
    cursor: Option<Cursor<Document>>,
}

impl Snapshot {
    /// Create a snapshot iterator, computing the frozen upper bound when the
    /// provided position does not carry one. Returns `None` when the
    /// collection has no documents, in which case there is nothing to
    /// snapshot and the caller goes straight to CDC.
    pub(crate) async fn new(
        collection: Collection<Document>,
        ordering_field: String,
        batch_size: u32,
        element: Option<Value>,
        max_element: Option<Value>,
        resume_token: Vec<u8>,
    ) -> Result<Option<Self>> {
        let max_element = match max_element {
            Some(max) => max,
            None => match newest_element(&collection, &ordering_field).await? {
                Some(max) => max,
                None => return Ok(None),
            },
        };

        Ok(Some(Self {
            collection,
            ordering_field,
            batch_size,
            last_element: element,
            max_element,
            resume_token,
            cursor: None,
        }))
    }

    /// Whether another snapshot record is available. Returns `false` once
    /// the frozen window is drained.
    pub(crate) async fn has_next(&mut self) -> Result<bool> {
        if let Some(cursor) = self.cursor.as_mut() {
            if cursor
                .advance()
                .await
                .map_err(|e| Error::engine("advance snapshot cursor", e))?
            {
                return Ok(true);
            }
        }

        self.load_batch().await?;

        match self.cursor.as_mut() {
            Some(cursor) => cursor
                .advance()
                .await
                .map_err(|e| Error::engine("advance snapshot cursor", e)),
            None => Ok(false),
        }
    }

    /// Return the record under the cursor. Must be preceded by a `has_next`
    /// that returned `true`.
    pub(crate) fn next(&mut self) -> Result<Record> {
        let cursor = self.cursor.as_ref().ok_or(Error::NoIterator)?;
        let doc: Document = cursor
            .current()
            .try_into()
            .map_err(|e: bson::raw::Error| Error::DecodeDocument(e.to_string()))?;

        let row = codec::document_to_structured(doc)?;

        let element = row.get(&self.ordering_field).cloned();
        let position = Position::Snapshot {
            element: element.clone(),
            max_element: Some(self.max_element.clone()),
            resume_token: self.resume_token.clone(),
        };
        self.last_element = element;

        let id = row.get(ID_FIELD).cloned().ok_or_else(|| {
            Error::DecodeDocument("snapshot document has no _id field".to_string())
        })?;
        let mut key = StructuredData::new();
        key.insert(ID_FIELD.to_string(), id);

        let metadata = Metadata {
            collection: self.collection.name().to_string(),
            created_at: Utc::now(),
        };

        Ok(Record::snapshot(
            position.encode()?,
            metadata,
            key,
            Payload::Structured(row),
        ))
    }

    /// Release the server-side cursor. Idempotent.
    pub(crate) async fn stop(&mut self) -> Result<()> {
        if self.cursor.take().is_some() {
            tracing::debug!("closed snapshot cursor");
        }

        Ok(())
    }

    // Open a cursor over the next batch: ordering field ascending, bounded
    // by the frozen upper bound, starting after the last emitted element.
    async fn load_batch(&mut self) -> Result<()> {
        let mut range = Document::new();
        range.insert("$lte", codec::coerce_object_id(&self.max_element));
        if let Some(last) = &self.last_element {
            range.insert("$gt", codec::coerce_object_id(last));
        }

        let mut filter = Document::new();
        filter.insert(self.ordering_field.clone(), range);

        let mut sort = Document::new();
        sort.insert(self.ordering_field.clone(), 1);

        tracing::debug!(
            "loading snapshot batch from {:?} with filter {:?}",
            self.collection.name(),
            filter
        );

        let cursor = self
            .collection
            .find(filter)
            .sort(sort)
            .limit(i64::from(self.batch_size))
            .await
            .map_err(|e| Error::engine("load snapshot batch", e))?;
        self.cursor = Some(cursor);

        Ok(())
    }
}

// The greatest ordering-field value currently in the collection, normalized
// to a canonical value. `None` when the collection is empty.
async fn newest_element(
    collection: &Collection<Document>,
    ordering_field: &str,
) -> Result<Option<Value>> {
    let mut sort = Document::new();
    sort.insert(ordering_field.to_string(), -1);

    let newest = collection
        .find_one(Document::new())
        .sort(sort)
        .await
        .map_err(|e| Error::engine("query newest ordering element", e))?;

    match newest {
        Some(doc) => {
            let element = doc.get(ordering_field).cloned().ok_or_else(|| {
                Error::DecodeDocument(format!(
                    "newest document has no {ordering_field:?} field"
                ))
            })?;

            Ok(Some(codec::bson_to_value(element)?))
        }
        None => Ok(None),
    }
}
