use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::logger::{FileLogOptions, SqliteParams, DEFAULT_TABLE};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay the transaction log, then serve the key-value API over HTTP.
    Serve(ServeArgs),
    /// Print every event in the transaction log as a JSON line.
    Dump {
        #[command(subcommand)]
        backend: Backend,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Socket address the HTTP API should bind to. Use port 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    #[command(subcommand)]
    pub backend: Backend,
}

/// Durable medium the transaction log is written to.
#[derive(Subcommand, Debug, Clone)]
pub enum Backend {
    /// Append-only text file, one event per line.
    File(FileArgs),
    /// SQLite table, one row per event.
    Sqlite(SqliteArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FileArgs {
    /// Path of the log file; created if missing.
    #[arg(long, default_value = "transaction.log")]
    pub path: PathBuf,

    /// fsync after every record instead of only flushing it.
    #[arg(long)]
    pub sync_data: bool,
}

impl FileArgs {
    pub fn options(&self) -> FileLogOptions {
        FileLogOptions {
            sync_data: self.sync_data,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SqliteArgs {
    /// Path of the SQLite database; created if missing.
    #[arg(long, default_value = "kv.sqlite3")]
    pub path: PathBuf,

    /// Table holding the events; created on first use.
    #[arg(long, default_value = DEFAULT_TABLE)]
    pub table: String,
}

impl SqliteArgs {
    pub fn params(&self) -> SqliteParams {
        SqliteParams::new(self.path.clone()).with_table(self.table.clone())
    }
}
