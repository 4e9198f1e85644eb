use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Failure reported by the MongoDB driver, wrapped with the subsystem
    /// that triggered it ("load snapshot batch", "poll change stream", ...).
    #[error("{context}: {source}")]
    Engine {
        context: &'static str,
        source: mongodb::error::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("parse position: {0}")]
    ParsePosition(String),

    #[error("serialize position: {0}")]
    SerializePosition(String),

    /// The change stream reported no position to resume from. This occurs
    /// on server versions that predate post-batch resume tokens.
    #[error("no resume token available from change stream")]
    NoResumeToken,

    #[error("decode document: {0}")]
    DecodeDocument(String),

    #[error("unsupported value type: {0}")]
    UnsupportedType(String),

    /// An event with an operation type outside insert/update/delete slipped
    /// through the change stream filter.
    #[error("unsupported operation type: {0}")]
    UnsupportedOperationType(String),

    /// The combined iterator was asked for records while holding no
    /// sub-iterator. This is an invariant violation, not a runtime condition.
    #[error("no iterator")]
    NoIterator,

    #[error("connector is not opened")]
    NotOpened,

    /// Not a failure: no record is available right now. Callers should wait
    /// and read again.
    #[error("no record available, backoff and retry")]
    BackoffRetry,

    /// The record key is empty on an update or delete.
    #[error("record key is empty")]
    EmptyKey,

    #[error("write record at index {index}: {source}")]
    WriteRecord { index: usize, source: Box<Error> },

    #[error("stop iterator: {0}")]
    Stop(String),
}

impl Error {
    pub(crate) fn engine(context: &'static str, source: mongodb::error::Error) -> Self {
        Self::Engine { context, source }
    }

    /// True for the sentinel that signals "no record now, try again later".
    pub fn is_backoff_retry(&self) -> bool {
        matches!(self, Self::BackoffRetry)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
