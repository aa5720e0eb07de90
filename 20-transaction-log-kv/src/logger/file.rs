//! Append-only file medium.
//!
//! A record counts as persisted once its terminating newline is on disk.
//! Bytes after the last newline are the remains of an interrupted append:
//! [`FileTransactionLogger::open`] cuts them off before the writer starts.
//! Complete lines that fail to decode are never repaired and make replay fail.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use futures::{future::BoxFuture, FutureExt};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter},
    sync::mpsc,
};
use tracing::{debug, info, warn};

use super::funnel::{Funnel, ReplayFeed, Request, WriterContext};
use super::{ErrorStream, TransactionLogger};
use crate::error::{DecodeError, LogError};
use crate::event::{decode_line, encode_line, Event, Mutation};

#[derive(Debug, Clone, Copy, Default)]
pub struct FileLogOptions {
    /// `fsync` every record instead of only flushing it to the OS.
    pub sync_data: bool,
}

pub struct FileTransactionLogger {
    path: PathBuf,
    options: FileLogOptions,
    funnel: Funnel,
    appender: Mutex<Option<File>>,
}

impl FileTransactionLogger {
    /// Opens (or creates) the log at `path`, finds the last persisted sequence
    /// number and truncates a torn trailing record.
    pub async fn open(path: impl AsRef<Path>, options: FileLogOptions) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();

        let appender = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|err| LogError::Connectivity(err.into()))?;

        let reader = File::open(&path).await.map_err(LogError::read)?;
        let tail = scan(reader).await.map_err(LogError::read)?;

        if tail.valid_len < tail.file_len {
            warn!(
                path = %path.display(),
                torn_bytes = tail.file_len - tail.valid_len,
                "truncating incomplete trailing record"
            );
            appender
                .set_len(tail.valid_len)
                .await
                .map_err(|err| LogError::TornTail(err.into()))?;
        }

        info!(
            path = %path.display(),
            last_sequence = tail.last_sequence,
            "opened transaction log"
        );

        Ok(Self {
            path,
            options,
            funnel: Funnel::new(tail.last_sequence),
            appender: Mutex::new(Some(appender)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TransactionLogger for FileTransactionLogger {
    fn record(&self, mutation: Mutation) {
        self.funnel.enqueue(mutation);
    }

    fn errors(&self) -> ErrorStream {
        self.funnel.errors()
    }

    fn replay(&self) -> (mpsc::Receiver<Event>, mpsc::Receiver<LogError>) {
        replay_file(&self.path)
    }

    fn run(&self) {
        let Some(writer) = self.funnel.start() else {
            warn!(path = %self.path.display(), "transaction log writer already running");
            return;
        };
        let Some(file) = self
            .appender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            writer.fail(LogError::NotRunning);
            return;
        };
        tokio::spawn(write_loop(writer, BufWriter::new(file), self.options));
    }

    fn sync(&self) -> BoxFuture<'_, Result<(), LogError>> {
        self.funnel.sync().boxed()
    }

    fn last_sequence(&self) -> u64 {
        self.funnel.last_sequence()
    }
}

/// Scans the log at `path` without opening it for writing.
///
/// Nothing is created or truncated: a missing file is a read failure and a
/// torn trailing record is left on disk, only skipped. Safe to run against a
/// log that a live writer is appending to.
pub fn replay_file(path: impl AsRef<Path>) -> (mpsc::Receiver<Event>, mpsc::Receiver<LogError>) {
    let (mut feed, events, errors) = ReplayFeed::channel();
    let path = path.as_ref().to_path_buf();
    tokio::spawn(async move {
        if let Err(err) = read_log(&path, &mut feed).await {
            feed.fail(err).await;
        }
    });
    (events, errors)
}

async fn write_loop(mut writer: WriterContext, mut file: BufWriter<File>, options: FileLogOptions) {
    while let Some(request) = writer.next().await {
        match request {
            Request::Record(mutation) => {
                let event = writer.sequence(mutation);
                if let Err(err) = append(&mut file, &event, options).await {
                    writer.fail(LogError::write(event.sequence, err));
                    return;
                }
                debug!(sequence = event.sequence, kind = %event.kind(), "event persisted");
                writer.persisted(&event);
            }
            Request::Barrier(done) => {
                let _ = done.send(Ok(()));
            }
        }
    }
    debug!("transaction log writer drained");
}

async fn append(file: &mut BufWriter<File>, event: &Event, options: FileLogOptions) -> io::Result<()> {
    file.write_all(encode_line(event).as_bytes()).await?;
    file.flush().await?;
    if options.sync_data {
        file.get_ref().sync_data().await?;
    }
    Ok(())
}

struct LogTail {
    last_sequence: u64,
    /// Length of the prefix made of complete lines.
    valid_len: u64,
    file_len: u64,
}

async fn scan(file: File) -> io::Result<LogTail> {
    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    let mut tail = LogTail {
        last_sequence: 0,
        valid_len: 0,
        file_len: 0,
    };

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).await?;
        if read == 0 {
            return Ok(tail);
        }
        tail.file_len += read as u64;
        if !line.ends_with(b"\n") {
            continue;
        }
        tail.valid_len = tail.file_len;
        if let Some(event) = std::str::from_utf8(&line)
            .ok()
            .and_then(|text| decode_line(text).ok())
        {
            tail.last_sequence = event.sequence;
        }
    }
}

async fn read_log(path: &Path, feed: &mut ReplayFeed) -> Result<(), LogError> {
    let file = File::open(path).await.map_err(LogError::read)?;
    // Only what exists now; appends made while the scan runs are not part of it.
    let len = file.metadata().await.map_err(LogError::read)?.len();
    read_records(file.take(len), feed).await
}

async fn read_records<R>(source: R, feed: &mut ReplayFeed) -> Result<(), LogError>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(source);
    let mut line = Vec::new();
    let mut record = 0u64;

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).await.map_err(LogError::read)?;
        if read == 0 {
            return Ok(());
        }
        if !line.ends_with(b"\n") {
            debug!(record = record + 1, "ignoring uncommitted trailing record");
            return Ok(());
        }
        record += 1;

        let text = std::str::from_utf8(&line).map_err(|_| LogError::Decode {
            record,
            source: DecodeError::Utf8,
        })?;
        let event = decode_line(text).map_err(|source| LogError::Decode { record, source })?;
        if !feed.push(event).await? {
            return Ok(());
        }
    }
}
