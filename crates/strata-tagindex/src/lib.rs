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

//! Tag index core.
//!
//! A tag maps a human-readable name to a content digest. Writes land in a
//! two-level store (on-disk cache plus durable backend) and expand into
//! neighbor duplication fan-out with staggered delays. When replication is
//! requested, the write also expands into per-remote replication tasks run
//! through the persisted-retry engine. The disk cache exists for write-back availability,
//! not read acceleration: a backend hit is never cached back.

pub mod backend;
pub mod cache;
pub mod client;
pub mod error;
pub mod http;
pub mod origin;
pub mod remotes;
pub mod replication;
pub mod resolver;
pub mod server;
pub mod store;
pub mod tagpath;
pub mod writeback;

#[cfg(test)]
pub(crate) mod testutil;

pub use backend::{Backend, BackendError, BackendManager};
pub use cache::TagCache;
pub use client::{ClientError, ClientProvider, HttpClientProvider, HttpTagClient, TagClient};
pub use error::{TagIndexError, TagIndexResult};
pub use origin::{OriginCluster, OriginError};
pub use remotes::Remotes;
pub use replication::ReplicationExecutor;
pub use resolver::DependencyResolver;
pub use server::TagServer;
pub use store::TagStore;
pub use writeback::WriteBackExecutor;
