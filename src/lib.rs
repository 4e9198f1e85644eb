//! MongoDB Connector
//!
//! A bidirectional change-data-capture connector between MongoDB and a
//! streaming pipeline that exchanges canonical change records.
//!
//! # Features
//!
//! - Source: initial consistent snapshot of a collection, then seamless
//!   handoff to live change-stream tailing without gaps or duplicates
//! - Restartable from any emitted position, with at-least-once delivery
//! - Insert-only polling fallback on servers that reject change streams
//!   (e.g. Cosmos DB's API for MongoDB)
//! - Destination: routes create/update/delete records onto a collection
//!   with last-writer-wins semantics
//!
//! # Limitations
//!
//! - One connector instance reads from or writes to exactly one collection.
//! - In polling fallback mode, only inserts are detected; updates and
//!   deletes are not observable. The ordering field must grow monotonically
//!   for new documents to be discovered.
//! - In sharded deployments the change stream order is per-shard.
//!
//! # Usage
//!
//! ```no_run
//! use mongo_connector::{Source, SourceConfig};
//! use std::collections::HashMap;
//!
//! # async fn run() -> mongo_connector::Result<()> {
//! let mut raw = HashMap::new();
//! raw.insert("db".to_string(), "store".to_string());
//! raw.insert("collection".to_string(), "orders".to_string());
//!
//! let mut source = Source::new(SourceConfig::parse(&raw)?);
//! source.open(&[]).await?;
//!
//! loop {
//!     match source.read().await {
//!         Ok(record) => {
//!             // hand the record to the pipeline; keep record.position
//!         }
//!         Err(e) if e.is_backoff_retry() => {
//!             tokio::time::sleep(std::time::Duration::from_millis(500)).await;
//!         }
//!         Err(e) => return Err(e),
//!     }
//! }
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod destination;
pub mod error;
pub mod record;
pub mod source;

mod collection;

pub use config::{AuthConfig, AuthMechanism, Config};
pub use destination::Destination;
pub use error::{Error, Result};
pub use record::{Metadata, Operation, Payload, Record, StructuredData, Value, ID_FIELD};
pub use source::{Combined, CombinedParams, Position, Source, SourceConfig, SourceIterator};
