//! Unified error types for stashfetch.

use tokio_rusqlite::rusqlite;

use crate::envelope::CodecError;

/// Unified error types for the store and envelope layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., zero queue depth).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Database operation failed.
    #[error("STORE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("STORE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Filesystem operation failed.
    #[error("STORE_ERROR: io: {0}")]
    Io(#[from] std::io::Error),

    /// The writer dropped or failed the job before delivering a result.
    #[error("WRITER_FAILED: {0}")]
    WriterFailed(String),

    /// The job queue no longer accepts submissions.
    #[error("QUEUE_CLOSED")]
    QueueClosed,

    /// A cached value could not be encoded or decoded.
    #[error("CODEC_ERROR: {0}")]
    Codec(#[from] CodecError),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
