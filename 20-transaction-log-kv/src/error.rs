//! Error kinds of the transaction logging subsystem.
//!
//! Construction-time failures are returned directly from the backend
//! constructors. Everything that goes wrong after the writer or a replay
//! reader has started is delivered once on a stream and is fatal to the
//! durability of the log.

use std::io;

use thiserror::Error;

/// Failure raised by the durable medium itself.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
}

/// A record that could not be turned back into an [`Event`](crate::event::Event).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("expected 4 tab-separated fields, found {0}")]
    FieldCount(usize),

    #[error("invalid sequence number {0:?}")]
    Sequence(String),

    #[error("unknown event kind {0:?}")]
    Kind(String),

    #[error("record has an empty key")]
    EmptyKey,

    #[error("put record has no value")]
    MissingValue,

    #[error("delete record carries a value")]
    ValueOnDelete,

    #[error("invalid escape sequence in {0:?}")]
    Escape(String),

    #[error("record is not valid UTF-8")]
    Utf8,
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to append event {sequence} to the transaction log: {source}")]
    DurableWrite {
        sequence: u64,
        #[source]
        source: BackendError,
    },

    #[error("failed to read the transaction log: {0}")]
    DurableRead(#[source] BackendError),

    #[error("malformed record {record} in the transaction log: {source}")]
    Decode {
        /// 1-based position of the record in the scan, whatever its sequence field says.
        record: u64,
        #[source]
        source: DecodeError,
    },

    #[error("event {found} is out of sequence, expected {expected}")]
    OutOfSequence { expected: u64, found: u64 },

    #[error("cannot reach the durable medium: {0}")]
    Connectivity(#[source] BackendError),

    #[error("failed to prepare the transaction table: {0}")]
    Schema(#[source] BackendError),

    #[error("failed to truncate the torn tail of the transaction log: {0}")]
    TornTail(#[source] BackendError),

    #[error("invalid table name {0:?}")]
    InvalidTableName(String),

    #[error("the transaction log writer is not running")]
    NotRunning,

    #[error("the transaction log writer has stopped")]
    WriterStopped,
}

impl LogError {
    pub(crate) fn read(source: impl Into<BackendError>) -> Self {
        LogError::DurableRead(source.into())
    }

    pub(crate) fn write(sequence: u64, source: impl Into<BackendError>) -> Self {
        LogError::DurableWrite {
            sequence,
            source: source.into(),
        }
    }
}
