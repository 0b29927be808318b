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

//! Peer-to-peer torrent scheduler.
//!
//! All mutable scheduler state lives on a single event-loop task; readers,
//! writers, handshakers, announcers, and per-torrent dispatchers are
//! independent tasks that talk to the loop exclusively by sending events.
//! That one rule is what makes the connection state machine race-free
//! without per-field locking, and it is why every handler that needs a
//! follow-up event spawns a task to send it instead of sending inline.

pub mod announce;
pub mod blacklist;
pub mod conn;
pub mod connstate;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod handshake;
pub mod scheduler;
pub mod storage;
pub mod wire;

pub use announce::{AnnounceClient, AnnounceQueue, AnnounceRequest, HttpAnnounceClient, PeerInfo};
pub use blacklist::Blacklist;
pub use conn::Conn;
pub use connstate::{ConnState, MoveOutcome};
pub use dispatch::Dispatcher;
pub use error::{SchedulerError, SchedulerResult};
pub use events::{Event, EventSender, StateSnapshot};
pub use handshake::Handshake;
pub use scheduler::SchedulerHandle;
pub use storage::{DiskArchive, StorageError, Torrent, TorrentArchive};
pub use wire::{ErrorCode, Frame, Message, WireError};
