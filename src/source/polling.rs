//! Insert-only polling iterator, used when the server rejects change
//! streams (Cosmos DB's API for MongoDB).
//!
//! The iterator repeatedly sweeps the collection in ordering-field order.
//! When a sweep drains it refreshes the upper bound and scans the range
//! that appeared since, so inserts with ordering-field values greater than
//! the previous bound are discovered continuously. Updates and deletes are
//! not observable in this mode.

use crate::codec;
use crate::error::{Error, Result};
use crate::record::{Metadata, Payload, Record, StructuredData, Value, ID_FIELD};
use crate::source::position::Position;
use bson::Document;
use chrono::Utc;
use mongodb::{Collection, Cursor};

/// A polling iterator over a single collection.
///
/// Emitted records are tagged `create` because they represent ongoing
/// discovery rather than a one-shot initial load, and carry `cdc`-mode
/// positions so a restart goes through the normal change-stream attempt
/// (and lands back here on the same engine limitation).
pub(crate) struct Polling {
    collection: Collection<Document>,
    ordering_field: String,
    batch_size: u32,
    last_element: Option<Value>,
    max_element: Option<Value>,
    cursor: Option<Cursor<Document>>,
}

impl Polling {
    pub(crate) fn new(
        collection: Collection<Document>,
        ordering_field: String,
        batch_size: u32,
    ) -> Self {
        Self {
            collection,
            ordering_field,
            batch_size,
            last_element: None,
            max_element: None,
            cursor: None,
        }
    }

    /// Whether another insert is available. Returns `false` when the
    /// collection holds nothing past the last emitted element; the caller
    /// backs off and polls again.
    pub(crate) async fn has_next(&mut self) -> Result<bool> {
        let advanced = match self.cursor.as_mut() {
            Some(cursor) => cursor
                .advance()
                .await
                .map_err(|e| Error::engine("advance polling cursor", e))?,
            None => false,
        };
        if advanced {
            return Ok(true);
        }
        self.cursor = None;

        // The sweep drained; look for rows that arrived past the previous
        // upper bound.
        if !self.refresh_max_element().await? {
            return Ok(false);
        }
        self.load_batch().await?;

        match self.cursor.as_mut() {
            Some(cursor) => cursor
                .advance()
                .await
                .map_err(|e| Error::engine("advance polling cursor", e)),
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
        self.last_element = row.get(&self.ordering_field).cloned();

        let id = row.get(ID_FIELD).cloned().ok_or_else(|| {
            Error::DecodeDocument("polled document has no _id field".to_string())
        })?;
        let mut key = StructuredData::new();
        key.insert(ID_FIELD.to_string(), id);

        let metadata = Metadata {
            collection: self.collection.name().to_string(),
            created_at: Utc::now(),
        };

        // No resume token exists without a change stream; the empty token
        // makes a restart start the stream attempt from the current time.
        let position = Position::Cdc {
            resume_token: Vec::new(),
        };

        Ok(Record::create(
            position.encode()?,
            metadata,
            key,
            Payload::Structured(row),
        ))
    }

    /// Release the server-side cursor. Idempotent.
    pub(crate) async fn stop(&mut self) -> Result<()> {
        if self.cursor.take().is_some() {
            tracing::debug!("closed polling cursor");
        }

        Ok(())
    }

    // Re-read the greatest ordering-field value so the next sweep covers
    // documents inserted since the previous one. False when the collection
    // is empty.
    async fn refresh_max_element(&mut self) -> Result<bool> {
        let mut sort = Document::new();
        sort.insert(self.ordering_field.clone(), -1);

        let newest = self
            .collection
            .find_one(Document::new())
            .sort(sort)
            .await
            .map_err(|e| Error::engine("query newest ordering element", e))?;

        match newest {
            Some(doc) => {
                let element = doc.get(&self.ordering_field).cloned().ok_or_else(|| {
                    Error::DecodeDocument(format!(
                        "newest document has no {:?} field",
                        self.ordering_field
                    ))
                })?;
                self.max_element = Some(codec::bson_to_value(element)?);

                Ok(true)
            }
            None => {
                self.max_element = None;

                Ok(false)
            }
        }
    }

    async fn load_batch(&mut self) -> Result<()> {
        let mut range = Document::new();
        if let Some(max) = &self.max_element {
            range.insert("$lte", codec::coerce_object_id(max));
        }
        if let Some(last) = &self.last_element {
            range.insert("$gt", codec::coerce_object_id(last));
        }

        let mut filter = Document::new();
        filter.insert(self.ordering_field.clone(), range);

        let mut sort = Document::new();
        sort.insert(self.ordering_field.clone(), 1);

        let cursor = self
            .collection
            .find(filter)
            .sort(sort)
            .limit(i64::from(self.batch_size))
            .await
            .map_err(|e| Error::engine("load polling batch", e))?;
        self.cursor = Some(cursor);

        Ok(())
    }
}
