//! Per-record write routing for the destination connector.

use crate::codec;
use crate::error::{Error, Result};
use crate::record::{Operation, Record, StructuredData, ID_FIELD};
use bson::{doc, Document};
use mongodb::{Collection, Database};

/// Routes records to inserts, updates and deletes on the target collection.
///
/// Writes are last-writer-wins; no conflict resolution happens here.
pub(crate) struct Writer {
    database: Database,
    collection: Collection<Document>,
}

impl Writer {
    pub(crate) fn new(database: Database, collection: Collection<Document>) -> Self {
        Self {
            database,
            collection,
        }
    }

    /// Apply a single record according to its operation.
    pub(crate) async fn write(&self, record: &Record) -> Result<()> {
        match record.operation {
            Operation::Snapshot | Operation::Create => self.insert(record).await,
            Operation::Update => self.update(record).await,
            Operation::Delete => self.delete(record).await,
        }
    }

    async fn insert(&self, record: &Record) -> Result<()> {
        // The payload is inserted as-is; `_id` coercion is handled entirely
        // by the string-to-object-id encoding in the codec.
        let payload = after_payload(record)?;
        let document = codec::structured_to_document(&payload);

        self.target_collection(record)
            .insert_one(document)
            .await
            .map_err(|e| Error::engine("insert document", e))?;

        Ok(())
    }

    async fn update(&self, record: &Record) -> Result<()> {
        if record.key.is_empty() {
            return Err(Error::EmptyKey);
        }

        let mut payload = after_payload(record)?;
        // The key identifies the document; `_id` must not appear in the
        // update body because it is immutable.
        payload.remove(ID_FIELD);

        let filter = codec::filter_from_key(&record.key);
        let body = codec::structured_to_document(&payload);

        self.target_collection(record)
            .update_one(filter, doc! { "$set": body })
            .await
            .map_err(|e| Error::engine("update document", e))?;

        Ok(())
    }

    async fn delete(&self, record: &Record) -> Result<()> {
        if record.key.is_empty() {
            return Err(Error::EmptyKey);
        }

        let filter = codec::filter_from_key(&record.key);

        self.target_collection(record)
            .delete_one(filter)
            .await
            .map_err(|e| Error::engine("delete document", e))?;

        Ok(())
    }

    // A record whose metadata names a different collection is routed there,
    // provided the configured credentials grant access.
    fn target_collection(&self, record: &Record) -> Collection<Document> {
        let name = record.metadata.collection.as_str();
        if !name.is_empty() && name != self.collection.name() {
            self.database.collection(name)
        } else {
            self.collection.clone()
        }
    }
}

fn after_payload(record: &Record) -> Result<StructuredData> {
    match &record.payload_after {
        Some(payload) => payload.to_structured(),
        None => Ok(StructuredData::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Metadata, Value};
    use chrono::Utc;
    use mongodb::options::ClientOptions;
    use mongodb::Client;

    // Client construction is lazy, so handles can be built without a server.
    async fn writer() -> Writer {
        let options = ClientOptions::parse("mongodb://localhost:27017")
            .await
            .unwrap();
        let client = Client::with_options(options).unwrap();
        let database = client.database("test");
        let collection = database.collection("users");

        Writer::new(database, collection)
    }

    fn record_for(collection: &str) -> Record {
        let mut key = StructuredData::new();
        key.insert(ID_FIELD.to_string(), Value::String("a".to_string()));

        Record::delete(
            vec![],
            Metadata {
                collection: collection.to_string(),
                created_at: Utc::now(),
            },
            key,
        )
    }

    #[tokio::test]
    async fn test_default_collection_is_used_without_override() {
        let writer = writer().await;

        for name in ["users", ""] {
            let target = writer.target_collection(&record_for(name));
            assert_eq!(target.name(), "users");
        }
    }

    #[tokio::test]
    async fn test_metadata_override_routes_to_another_collection() {
        let writer = writer().await;
        let target = writer.target_collection(&record_for("audit"));
        assert_eq!(target.name(), "audit");
    }

    #[test]
    fn test_empty_after_payload_is_an_empty_map() {
        let record = record_for("users");
        assert!(after_payload(&record).unwrap().is_empty());
    }
}
