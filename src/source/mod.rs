//! The source half of the connector: emits a stream of change records from
//! a single MongoDB collection.
//!
//! Reading goes through three phases managed by the [`Combined`] iterator:
//! an initial consistent snapshot, live change-stream tailing, and an
//! insert-only polling fallback on servers that reject change streams.

mod cdc;
mod combined;
mod config;
mod polling;
mod position;
mod snapshot;

pub use combined::{Combined, CombinedParams};
pub use config::{
    SourceConfig, DEFAULT_BATCH_SIZE, DEFAULT_ORDERING_FIELD, KEY_BATCH_SIZE, KEY_ORDERING_FIELD,
    KEY_SNAPSHOT,
};
pub use position::Position;

use crate::collection::get_collection;
use crate::error::{Error, Result};
use crate::record::Record;
use async_trait::async_trait;
use bson::doc;
use mongodb::Client;

/// The iterator interface the source reads from.
#[async_trait]
pub trait SourceIterator: Send {
    async fn has_next(&mut self) -> Result<bool>;
    async fn next(&mut self) -> Result<Record>;
    async fn stop(&mut self) -> Result<()>;
}

#[async_trait]
impl SourceIterator for Combined {
    async fn has_next(&mut self) -> Result<bool> {
        Combined::has_next(self).await
    }

    async fn next(&mut self) -> Result<Record> {
        Combined::next(self).await
    }

    async fn stop(&mut self) -> Result<()> {
        Combined::stop(self).await
    }
}

/// The source connector.
///
/// All progress is single-threaded and cooperative: the caller drives
/// [`Source::read`] one invocation at a time, no background tasks are
/// spawned, and cancellation is the caller dropping the in-flight future or
/// bounding it with a deadline.
pub struct Source {
    config: SourceConfig,
    client: Option<Client>,
    iterator: Option<Box<dyn SourceIterator>>,
}

impl Source {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            client: None,
            iterator: None,
        }
    }

    /// Connect, verify the database and collection exist, and build the
    /// iterator, resuming from `position` when it is non-empty.
    pub async fn open(&mut self, position: &[u8]) -> Result<()> {
        let options = self.config.connection.client_options().await?;
        let client =
            Client::with_options(options).map_err(|e| Error::engine("create client", e))?;

        client
            .database(&self.config.connection.db)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| Error::engine("ping mongo server", e))?;

        let collection = get_collection(
            &client,
            &self.config.connection.db,
            &self.config.connection.collection,
        )
        .await?;

        let position = Position::decode(position)?;

        let iterator = Combined::new(CombinedParams {
            collection,
            batch_size: self.config.batch_size,
            snapshot: self.config.snapshot,
            ordering_field: self.config.ordering_field.clone(),
            position,
        })
        .await?;

        self.iterator = Some(Box::new(iterator));
        self.client = Some(client);

        tracing::info!(
            "source opened for collection {:?} in database {:?}",
            self.config.connection.collection,
            self.config.connection.db
        );

        Ok(())
    }

    /// Return the next record, or [`Error::BackoffRetry`] when no record is
    /// available right now.
    pub async fn read(&mut self) -> Result<Record> {
        let iterator = self.iterator.as_mut().ok_or(Error::NotOpened)?;

        if !iterator.has_next().await? {
            return Err(Error::BackoffRetry);
        }

        iterator.next().await
    }

    /// Acknowledge a position. Observational only.
    pub fn ack(&self, position: &[u8]) -> Result<()> {
        tracing::debug!("got ack for position {}", String::from_utf8_lossy(position));

        Ok(())
    }

    /// Stop the iterator and disconnect. Idempotent.
    pub async fn teardown(&mut self) -> Result<()> {
        if let Some(mut iterator) = self.iterator.take() {
            iterator.stop().await?;
        }

        if let Some(client) = self.client.take() {
            client.shutdown().await;
        }

        Ok(())
    }
}
