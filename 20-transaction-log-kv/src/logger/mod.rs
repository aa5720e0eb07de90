//! The transaction logger: a single-writer funnel in front of a durable medium.
//!
//! Request handlers call [`TransactionLogger::record_put`] and
//! [`TransactionLogger::record_delete`] after they have mutated the store.
//! Those calls only enqueue; exactly one writer task owns the medium, assigns
//! sequence numbers in queue order and appends each record before taking the
//! next one. Write failures are published once on [`ErrorStream`].
//!
//! Two media implement the same capability set:
//!
//! - [`FileTransactionLogger`] appends tab-separated lines to a local file.
//! - [`SqliteTransactionLogger`] inserts rows into a SQLite table.

mod file;
mod funnel;
mod sqlite;

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};

use crate::error::LogError;
use crate::event::{Event, Mutation};

pub use file::{replay_file, FileLogOptions, FileTransactionLogger};
pub use sqlite::{replay_table, SqliteParams, SqliteTransactionLogger, DEFAULT_TABLE};

/// Capacity of the channels handed out by [`TransactionLogger::replay`].
pub const REPLAY_CHANNEL_CAPACITY: usize = 64;

/// Capability set shared by every durable medium.
///
/// `replay` and `run` spawn Tokio tasks and must be called from inside a
/// runtime.
pub trait TransactionLogger: Send + Sync {
    /// Hands a mutation to the writer. Never blocks and never drops; failures
    /// surface later on [`TransactionLogger::errors`].
    fn record(&self, mutation: Mutation);

    fn record_put(&self, key: &str, value: &str) {
        self.record(Mutation::put(key, value));
    }

    fn record_delete(&self, key: &str) {
        self.record(Mutation::delete(key));
    }

    /// Stream carrying the writer's fatal error, if one ever happens.
    fn errors(&self) -> ErrorStream;

    /// Starts an independent forward scan over the whole log.
    ///
    /// Events arrive in persisted order. The scan stops at the first read,
    /// decode or sequencing failure, which is sent on the second channel.
    fn replay(&self) -> (mpsc::Receiver<Event>, mpsc::Receiver<LogError>);

    /// Starts the writer. Later calls are no-ops.
    fn run(&self);

    /// Resolves once every mutation recorded before this call is durable.
    fn sync(&self) -> BoxFuture<'_, Result<(), LogError>>;

    /// Sequence number of the newest durable event, `0` for an empty log.
    fn last_sequence(&self) -> u64;
}

/// Read side of the writer's error channel.
///
/// Any number of streams can be taken from one logger; each yields the fatal
/// error once and then ends.
#[derive(Debug, Clone)]
pub struct ErrorStream {
    rx: watch::Receiver<Option<Arc<LogError>>>,
    delivered: bool,
}

impl ErrorStream {
    /// Wraps the receiving side of a medium's error channel. The channel
    /// holds `None` until the writer fails.
    pub fn new(rx: watch::Receiver<Option<Arc<LogError>>>) -> Self {
        Self {
            rx,
            delivered: false,
        }
    }

    /// The error published so far, without waiting.
    pub fn current(&self) -> Option<Arc<LogError>> {
        self.rx.borrow().clone()
    }

    /// Waits for the writer to fail. Returns `None` once the error has already
    /// been yielded by this stream or the logger is gone.
    pub async fn next(&mut self) -> Option<Arc<LogError>> {
        if self.delivered {
            return None;
        }
        loop {
            let current = self.rx.borrow_and_update().clone();
            if let Some(error) = current {
                self.delivered = true;
                return Some(error);
            }
            if self.rx.changed().await.is_err() {
                let last = self.rx.borrow().clone();
                self.delivered = last.is_some();
                return last;
            }
        }
    }
}
