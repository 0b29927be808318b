//! Scheduler events.
//!
//! Everything outside the event loop mutates scheduler state by sending one
//! of these. Sends are always raced against the shutdown token so no sender
//! can deadlock on a stopping scheduler. Nothing running inside the loop
//! may send inline; follow-up events are sent from a spawned task.

use std::sync::Arc;

use strata_core::{InfoHash, MetaInfo, PeerId};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::announce::PeerInfo;
use crate::conn::Conn;
use crate::error::SchedulerError;
use crate::handshake::{Handshake, WireStream};
use crate::storage::Torrent;

/// Events consumed by the scheduler loop.
pub enum Event {
    /// A remote peer sent us its handshake on a fresh socket.
    IncomingHandshake {
        /// The socket, positioned after the remote handshake.
        stream: WireStream,
        /// The remote handshake.
        handshake: Handshake,
    },
    /// An incoming handshake completed and produced a connection.
    IncomingConn {
        /// The established connection.
        conn: Arc<Conn>,
        /// Torrent the connection serves.
        torrent: Arc<dyn Torrent>,
    },
    /// An outgoing handshake completed and produced a connection.
    OutgoingConn {
        /// The established connection.
        conn: Arc<Conn>,
        /// Torrent the connection serves.
        torrent: Arc<dyn Torrent>,
    },
    /// A handshake aborted before producing a connection.
    FailedHandshake {
        /// Peer the handshake was with.
        peer_id: PeerId,
        /// Torrent the handshake was for.
        info_hash: InfoHash,
    },
    /// A connection died (read/write error, preemption, or peer close).
    ClosedConn {
        /// The closed connection.
        conn: Arc<Conn>,
    },
    /// Periodic: pull the next torrent off the announce queue.
    AnnounceTick,
    /// The tracker answered an announce.
    AnnounceResponse {
        /// Torrent that was announced.
        info_hash: InfoHash,
        /// Peers the tracker returned.
        peers: Vec<PeerInfo>,
    },
    /// An announce failed.
    AnnounceFailure {
        /// Torrent that was announced.
        info_hash: InfoHash,
    },
    /// A local client wants a torrent.
    NewTorrent {
        /// Torrent metadata.
        meta: MetaInfo,
        /// Resolved when the torrent is complete (or immediately if it
        /// already is).
        result: oneshot::Sender<Result<(), SchedulerError>>,
    },
    /// A dispatcher finished downloading its torrent.
    CompletedDispatcher {
        /// Torrent that completed.
        info_hash: InfoHash,
    },
    /// Periodic: sweep idle connections and dispatchers.
    PreemptionTick,
    /// Periodic: drop expired blacklist entries past their TTL.
    BlacklistCleanupTick,
    /// Test hook: capture a snapshot of the connection state.
    Inspect {
        /// Resolved with the snapshot.
        result: oneshot::Sender<StateSnapshot>,
    },
}

impl Event {
    /// Short discriminator for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::IncomingHandshake { .. } => "incoming_handshake",
            Self::IncomingConn { .. } => "incoming_conn",
            Self::OutgoingConn { .. } => "outgoing_conn",
            Self::FailedHandshake { .. } => "failed_handshake",
            Self::ClosedConn { .. } => "closed_conn",
            Self::AnnounceTick => "announce_tick",
            Self::AnnounceResponse { .. } => "announce_response",
            Self::AnnounceFailure { .. } => "announce_failure",
            Self::NewTorrent { .. } => "new_torrent",
            Self::CompletedDispatcher { .. } => "completed_dispatcher",
            Self::PreemptionTick => "preemption_tick",
            Self::BlacklistCleanupTick => "blacklist_cleanup_tick",
            Self::Inspect { .. } => "inspect",
        }
    }
}

/// Point-in-time view of the scheduler's connection state.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    /// Keys of active connections.
    pub active: Vec<(PeerId, InfoHash)>,
    /// Keys of pending connections.
    pub pending: Vec<(PeerId, InfoHash)>,
    /// Info hashes with a live dispatcher.
    pub dispatchers: Vec<InfoHash>,
    /// Number of tracked blacklist entries.
    pub blacklist_len: usize,
}

/// Shutdown-aware handle for sending events into the loop.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Event>,
    done: CancellationToken,
}

impl EventSender {
    /// Pair a channel with the shutdown token.
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Event>, done: CancellationToken) -> Self {
        Self { tx, done }
    }

    /// Send an event, giving up silently if the scheduler is stopping.
    pub async fn send(&self, event: Event) {
        tokio::select! {
            () = self.done.cancelled() => {}
            _ = self.tx.send(event) => {}
        }
    }

    /// Send from a fresh task. The only safe way to emit a follow-up event
    /// from code already running inside the loop.
    pub fn send_spawned(&self, event: Event) {
        let sender = self.clone();
        tokio::spawn(async move {
            sender.send(event).await;
        });
    }
}
