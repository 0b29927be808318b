#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! SQLite persistence for strata retry tasks.
//!
//! The task database is a local embedded store; writers are serialised
//! through a single-connection pool so concurrent submitters never trip over
//! SQLite write locking.

pub mod database;
pub mod error;
pub mod replication;
pub mod writeback;

pub use database::{connect, connect_in_memory};
pub use error::{DataError, DataResult};
pub use replication::{ReplicationTask, SqliteReplicationStore};
pub use writeback::{SqliteWriteBackStore, WriteBackTask};
