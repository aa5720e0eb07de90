//! Key-value store whose mutations are recorded in an append-only
//! transaction log and replayed at start-up.
//!
//! - [`event`] defines the logged mutation records and their line encoding.
//! - [`logger`] turns synchronous mutations into an ordered, asynchronously
//!   written event stream (file or SQLite medium) and reads it back.
//! - [`replay`] rebuilds the [`store`] from the log before traffic is served.
//! - [`api`] and [`server`] expose the store over HTTP; [`cli`] configures
//!   the binary.
//! - [`error`] collects the failure kinds of the logging subsystem.
//!
//! Integration tests drive the logger, the replayer and the router directly
//! through this crate.

pub mod api;
pub mod cli;
pub mod error;
pub mod event;
pub mod logger;
pub mod replay;
pub mod server;
pub mod store;
