//! Relational-table medium backed by SQLite.
//!
//! One row per event. The writer owns its own connection on a blocking
//! thread; every replay opens a fresh read-only connection.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use futures::{future::BoxFuture, FutureExt};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::funnel::{Funnel, ReplayFeed, Request, WriterContext};
use super::{ErrorStream, TransactionLogger};
use crate::error::LogError;
use crate::event::{Event, EventKind, Mutation};

pub const DEFAULT_TABLE: &str = "transactions";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SqliteParams {
    pub path: PathBuf,
    pub table: String,
}

impl SqliteParams {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            table: DEFAULT_TABLE.to_string(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }
}

pub struct SqliteTransactionLogger {
    params: SqliteParams,
    funnel: Funnel,
    connection: Mutex<Option<Connection>>,
}

impl SqliteTransactionLogger {
    /// Connects, checks the database answers, and creates the event table on
    /// first use.
    pub fn open(params: SqliteParams) -> Result<Self, LogError> {
        validate_table_name(&params.table)?;

        let conn = Connection::open(&params.path).map_err(|err| LogError::Connectivity(err.into()))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|err| LogError::Connectivity(err.into()))?;
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .map_err(|err| LogError::Connectivity(err.into()))?;

        let exists = table_exists(&conn, &params.table).map_err(|err| LogError::Schema(err.into()))?;
        if !exists {
            create_table(&conn, &params.table).map_err(|err| LogError::Schema(err.into()))?;
            info!(table = %params.table, "created transaction table");
        }

        let last_sequence: u64 = conn
            .query_row(
                &format!("SELECT COALESCE(MAX(sequence), 0) FROM {}", params.table),
                [],
                |row| row.get(0),
            )
            .map_err(LogError::read)?;

        info!(
            path = %params.path.display(),
            table = %params.table,
            last_sequence,
            "opened transaction table"
        );

        Ok(Self {
            params,
            funnel: Funnel::new(last_sequence),
            connection: Mutex::new(Some(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.params.path
    }

    pub fn table(&self) -> &str {
        &self.params.table
    }
}

impl TransactionLogger for SqliteTransactionLogger {
    fn record(&self, mutation: Mutation) {
        self.funnel.enqueue(mutation);
    }

    fn errors(&self) -> ErrorStream {
        self.funnel.errors()
    }

    fn replay(&self) -> (mpsc::Receiver<Event>, mpsc::Receiver<LogError>) {
        replay_table(self.params.clone())
    }

    fn run(&self) {
        let Some(writer) = self.funnel.start() else {
            warn!(table = %self.params.table, "transaction log writer already running");
            return;
        };
        let Some(conn) = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            writer.fail(LogError::NotRunning);
            return;
        };
        let table = self.params.table.clone();
        tokio::task::spawn_blocking(move || write_rows(writer, conn, &table));
    }

    fn sync(&self) -> BoxFuture<'_, Result<(), LogError>> {
        self.funnel.sync().boxed()
    }

    fn last_sequence(&self) -> u64 {
        self.funnel.last_sequence()
    }
}

/// Scans the event table through a read-only connection.
///
/// Neither the database nor the table is created: if either is missing the
/// scan fails with [`LogError::DurableRead`].
pub fn replay_table(params: SqliteParams) -> (mpsc::Receiver<Event>, mpsc::Receiver<LogError>) {
    let (mut feed, events, errors) = ReplayFeed::channel();
    tokio::task::spawn_blocking(move || {
        let scanned = validate_table_name(&params.table).and_then(|()| read_rows(&params, &mut feed));
        if let Err(err) = scanned {
            feed.blocking_fail(err);
        }
    });
    (events, errors)
}

fn validate_table_name(table: &str) -> Result<(), LogError> {
    let mut chars = table.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(LogError::InvalidTableName(table.to_string()))
    }
}

fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        params![table],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
}

fn create_table(conn: &Connection, table: &str) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            sequence INTEGER PRIMARY KEY AUTOINCREMENT,
            kind     TEXT NOT NULL,
            key      TEXT NOT NULL,
            value    TEXT
        );"
    ))
}

fn write_rows(mut writer: WriterContext, conn: Connection, table: &str) {
    let sql = format!("INSERT INTO {table} (sequence, kind, key, value) VALUES (?1, ?2, ?3, ?4)");

    while let Some(request) = writer.blocking_next() {
        match request {
            Request::Record(mutation) => {
                let event = writer.sequence(mutation);
                let inserted = conn.prepare_cached(&sql).and_then(|mut insert| {
                    insert.execute(params![
                        event.sequence,
                        event.kind().as_str(),
                        event.key(),
                        event.value(),
                    ])
                });
                if let Err(err) = inserted {
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
    debug!(table, "transaction log writer drained");
}

fn read_rows(params: &SqliteParams, feed: &mut ReplayFeed) -> Result<(), LogError> {
    let conn = Connection::open_with_flags(&params.path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(LogError::read)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(LogError::read)?;
    let mut statement = conn
        .prepare(&format!(
            "SELECT sequence, kind, key, value FROM {} ORDER BY sequence",
            params.table
        ))
        .map_err(LogError::read)?;
    let mut rows = statement.query([]).map_err(LogError::read)?;
    let mut record = 0u64;

    while let Some(row) = rows.next().map_err(LogError::read)? {
        record += 1;
        let sequence: u64 = row.get(0).map_err(LogError::read)?;
        let kind: String = row.get(1).map_err(LogError::read)?;
        let key: String = row.get(2).map_err(LogError::read)?;
        let value: Option<String> = row.get(3).map_err(LogError::read)?;

        let mutation = kind
            .parse::<EventKind>()
            .and_then(|kind| Mutation::from_parts(kind, key, value))
            .map_err(|source| LogError::Decode { record, source })?;
        if !feed.blocking_push(Event::new(sequence, mutation))? {
            return Ok(());
        }
    }
    Ok(())
}
