//! Plumbing shared by every medium: the mutation queue, the hand-off to the
//! single writer, and the feeds used by replay readers.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, warn};

use super::{ErrorStream, REPLAY_CHANNEL_CAPACITY};
use crate::error::LogError;
use crate::event::{Event, Mutation};

pub(crate) enum Request {
    Record(Mutation),
    /// Answered once every request queued ahead of it has been handled.
    Barrier(oneshot::Sender<Result<(), LogError>>),
}

/// Enqueue side of a logger. Cheap to call from many tasks at once; the
/// order of `send` on the shared channel is the persisted order.
pub(crate) struct Funnel {
    requests: mpsc::UnboundedSender<Request>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<Request>>>,
    errors: Arc<watch::Sender<Option<Arc<LogError>>>>,
    last_sequence: Arc<AtomicU64>,
    running: AtomicBool,
}

impl Funnel {
    pub(crate) fn new(last_sequence: u64) -> Self {
        let (requests, pending) = mpsc::unbounded_channel();
        let (errors, _) = watch::channel(None);
        Self {
            requests,
            pending: Mutex::new(Some(pending)),
            errors: Arc::new(errors),
            last_sequence: Arc::new(AtomicU64::new(last_sequence)),
            running: AtomicBool::new(false),
        }
    }

    pub(crate) fn enqueue(&self, mutation: Mutation) {
        if mutation.key().is_empty() {
            warn!(kind = %mutation.kind(), "refusing to record a mutation with an empty key");
            return;
        }
        if self.requests.send(Request::Record(mutation)).is_err() {
            warn!("transaction log writer has stopped; mutation was not recorded");
        }
    }

    pub(crate) fn errors(&self) -> ErrorStream {
        ErrorStream::new(self.errors.subscribe())
    }

    pub(crate) fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::Acquire)
    }

    /// Takes the receiving half of the queue for the one and only writer.
    /// Returns `None` if a writer was already started.
    pub(crate) fn start(&self) -> Option<WriterContext> {
        let requests = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        self.running.store(true, Ordering::Release);

        Some(WriterContext {
            requests,
            next_sequence: self.last_sequence() + 1,
            errors: Arc::clone(&self.errors),
            last_sequence: Arc::clone(&self.last_sequence),
        })
    }

    pub(crate) async fn sync(&self) -> Result<(), LogError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(LogError::NotRunning);
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.requests
            .send(Request::Barrier(done_tx))
            .map_err(|_| LogError::WriterStopped)?;
        done_rx.await.map_err(|_| LogError::WriterStopped)?
    }
}

/// Everything the writer task owns: the queue, the sequence counter and the
/// error publisher.
pub(crate) struct WriterContext {
    requests: mpsc::UnboundedReceiver<Request>,
    next_sequence: u64,
    errors: Arc<watch::Sender<Option<Arc<LogError>>>>,
    last_sequence: Arc<AtomicU64>,
}

impl WriterContext {
    pub(crate) async fn next(&mut self) -> Option<Request> {
        self.requests.recv().await
    }

    pub(crate) fn blocking_next(&mut self) -> Option<Request> {
        self.requests.blocking_recv()
    }

    /// Stamps the mutation with the next sequence number. The number is only
    /// consumed once [`WriterContext::persisted`] is called.
    pub(crate) fn sequence(&self, mutation: Mutation) -> Event {
        Event::new(self.next_sequence, mutation)
    }

    pub(crate) fn persisted(&mut self, event: &Event) {
        self.last_sequence.store(event.sequence, Ordering::Release);
        self.next_sequence = event.sequence + 1;
    }

    /// Publishes the writer's fatal error and shuts the queue. Barriers still
    /// waiting resolve to [`LogError::WriterStopped`].
    pub(crate) fn fail(mut self, err: LogError) {
        error!(error = %err, "transaction log writer failed");
        self.requests.close();
        self.errors.send_replace(Some(Arc::new(err)));
    }
}

/// Producer half of one replay scan.
pub(crate) struct ReplayFeed {
    events: mpsc::Sender<Event>,
    errors: mpsc::Sender<LogError>,
    expected: u64,
}

impl ReplayFeed {
    pub(crate) fn channel() -> (Self, mpsc::Receiver<Event>, mpsc::Receiver<LogError>) {
        let (events_tx, events_rx) = mpsc::channel(REPLAY_CHANNEL_CAPACITY);
        let (errors_tx, errors_rx) = mpsc::channel(1);
        let feed = Self {
            events: events_tx,
            errors: errors_tx,
            expected: 1,
        };
        (feed, events_rx, errors_rx)
    }

    fn check(&mut self, event: &Event) -> Result<(), LogError> {
        if event.sequence != self.expected {
            return Err(LogError::OutOfSequence {
                expected: self.expected,
                found: event.sequence,
            });
        }
        self.expected += 1;
        Ok(())
    }

    /// Forwards one decoded event. `Ok(false)` means nobody is listening any
    /// more and the scan should end quietly.
    pub(crate) async fn push(&mut self, event: Event) -> Result<bool, LogError> {
        self.check(&event)?;
        Ok(self.events.send(event).await.is_ok())
    }

    pub(crate) fn blocking_push(&mut self, event: Event) -> Result<bool, LogError> {
        self.check(&event)?;
        Ok(self.events.blocking_send(event).is_ok())
    }

    pub(crate) async fn fail(self, err: LogError) {
        let _ = self.errors.send(err).await;
    }

    pub(crate) fn blocking_fail(self, err: LogError) {
        let _ = self.errors.blocking_send(err);
    }
}
