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

//! Durable at-least-once task execution with bounded retry backoff.
//!
//! The engine persists every submitted task before touching it, drains two
//! bounded channels with parallel worker pools (one for fresh work, one for
//! retries), and degrades to the failed set whenever a buffer is full; the
//! retry poller is the fallback path that guarantees nothing is lost across
//! overload or process restarts.
//!
//! A task is in exactly one of `{pending, failed, removed}` at any time. The
//! pending/failed transition is the scheduling gate: a task executes on at
//! most one worker at a time because only `failed` tasks are re-enqueued, and
//! marking a task pending removes it from the poller's view.

pub mod engine;
pub mod error;
pub mod executor;
pub mod store;
pub mod task;

pub use engine::Engine;
pub use error::{EngineError, EngineResult};
pub use executor::Executor;
pub use store::{StoreError, TaskStore};
pub use task::{Task, TaskStatus};
