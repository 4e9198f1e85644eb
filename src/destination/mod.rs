//! The destination half of the connector: applies change records to a
//! MongoDB collection.

mod writer;

use crate::collection::get_collection;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::record::Record;
use bson::doc;
use mongodb::Client;
use writer::Writer;

/// The destination connector.
pub struct Destination {
    config: Config,
    client: Option<Client>,
    writer: Option<Writer>,
}

impl Destination {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            client: None,
            writer: None,
        }
    }

    /// Connect and verify the target database and collection exist.
    pub async fn open(&mut self) -> Result<()> {
        let options = self.config.client_options().await?;
        let client =
            Client::with_options(options).map_err(|e| Error::engine("create client", e))?;

        client
            .database(&self.config.db)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| Error::engine("ping mongo server", e))?;

        let collection = get_collection(&client, &self.config.db, &self.config.collection).await?;

        self.writer = Some(Writer::new(client.database(&self.config.db), collection));
        self.client = Some(client);

        tracing::info!(
            "destination opened for collection {:?} in database {:?}",
            self.config.collection,
            self.config.db
        );

        Ok(())
    }

    /// Write records in order. Returns the number written; on failure the
    /// error names the index of the record that failed so the caller can
    /// retry from that offset.
    pub async fn write(&mut self, records: &[Record]) -> Result<usize> {
        let writer = self.writer.as_ref().ok_or(Error::NotOpened)?;

        for (index, record) in records.iter().enumerate() {
            writer.write(record).await.map_err(|source| Error::WriteRecord {
                index,
                source: Box::new(source),
            })?;
        }

        Ok(records.len())
    }

    /// Disconnect. Idempotent.
    pub async fn teardown(&mut self) -> Result<()> {
        self.writer = None;

        if let Some(client) = self.client.take() {
            client.shutdown().await;
        }

        Ok(())
    }
}
