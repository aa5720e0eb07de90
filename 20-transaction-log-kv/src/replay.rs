//! Start-up recovery: rebuild the store from the transaction log.
//!
//! [`restore`] moves through two states. While replaying it applies every
//! persisted event, strictly in log order, to the store. Once the event
//! stream closes without an error the store is live and the caller may start
//! serving requests. Any read, decode or writer failure ends recovery; the
//! store then holds exactly the events applied before the failure.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::error::LogError;
use crate::logger::TransactionLogger;
use crate::store::KvStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub events_applied: u64,
    /// Sequence of the last applied event, `0` when the log was empty.
    pub last_sequence: u64,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("replay stopped after {applied} events: {source}")]
    Log {
        applied: u64,
        #[source]
        source: LogError,
    },

    #[error("transaction log writer failed during replay: {0}")]
    Writer(#[source] Arc<LogError>),
}

/// Replays the whole log into `store` and starts the logger's writer.
///
/// The writer is started before the first event is applied so mutations
/// recorded as soon as this returns are captured by the same log.
pub async fn restore<L>(logger: &L, store: &KvStore) -> Result<ReplayReport, ReplayError>
where
    L: TransactionLogger + ?Sized,
{
    let (mut events, mut replay_errors) = logger.replay();
    logger.run();
    let mut writer_errors = logger.errors();
    let mut report = ReplayReport::default();

    loop {
        tokio::select! {
            biased;

            event = events.recv() => match event {
                Some(event) => {
                    store.apply(&event);
                    report.events_applied += 1;
                    report.last_sequence = event.sequence;
                }
                None => break,
            },
            Some(source) = replay_errors.recv() => {
                return Err(ReplayError::Log { applied: report.events_applied, source });
            }
            Some(err) = writer_errors.next() => {
                return Err(ReplayError::Writer(err));
            }
        }
    }

    // The reader drops both senders together; a failure it hit is still queued.
    if let Some(source) = replay_errors.recv().await {
        return Err(ReplayError::Log {
            applied: report.events_applied,
            source,
        });
    }

    debug!(keys = store.len(), "store rebuilt");
    info!(
        events = report.events_applied,
        last_sequence = report.last_sequence,
        "transaction log replayed"
    );
    Ok(report)
}
