//! Peer connections.
//!
//! Every active connection owns two tasks: a reader pulling framed messages
//! off the socket into a bounded receiver channel, and a writer draining a
//! bounded sender channel to the socket. Close is idempotent through a
//! one-shot cancellation token; either task dying cancels the other.

use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use strata_core::{Bitfield, InfoHash, PeerId};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{SchedulerError, SchedulerResult};
use crate::wire::{Frame, WireCodec};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// One established peer connection.
pub struct Conn {
    peer_id: PeerId,
    info_hash: InfoHash,
    opened_by_remote: bool,
    created_at: Instant,
    peer_bitfield: Mutex<Bitfield>,
    out_tx: mpsc::Sender<Frame>,
    in_rx: Mutex<Option<mpsc::Receiver<Frame>>>,
    last_good_piece_received: Mutex<Option<Instant>>,
    last_piece_sent: Mutex<Option<Instant>>,
    closed: CancellationToken,
}

impl Conn {
    /// Wrap a post-handshake socket, spawning the reader and writer tasks.
    #[must_use]
    pub fn spawn(
        framed: Framed<TcpStream, WireCodec>,
        peer_id: PeerId,
        info_hash: InfoHash,
        opened_by_remote: bool,
        peer_bitfield: Bitfield,
        sender_buffer: usize,
        receiver_buffer: usize,
    ) -> std::sync::Arc<Self> {
        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(sender_buffer);
        let (in_tx, in_rx) = mpsc::channel::<Frame>(receiver_buffer);
        let closed = CancellationToken::new();

        let conn = std::sync::Arc::new(Self {
            peer_id,
            info_hash,
            opened_by_remote,
            created_at: Instant::now(),
            peer_bitfield: Mutex::new(peer_bitfield),
            out_tx,
            in_rx: Mutex::new(Some(in_rx)),
            last_good_piece_received: Mutex::new(None),
            last_piece_sent: Mutex::new(None),
            closed: closed.clone(),
        });

        let (mut sink, mut stream) = framed.split();

        let reader_closed = closed.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    () = reader_closed.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(frame)) => frame,
                        Some(Err(err)) => {
                            debug!(peer = %peer_id, error = %err, "connection read failed");
                            break;
                        }
                        None => break,
                    },
                };
                tokio::select! {
                    () = reader_closed.cancelled() => break,
                    delivered = in_tx.send(frame) => {
                        if delivered.is_err() {
                            break;
                        }
                    }
                }
            }
            reader_closed.cancel();
        });

        let writer_closed = closed;
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    () = writer_closed.cancelled() => break,
                    next = out_rx.recv() => match next {
                        Some(frame) => frame,
                        None => break,
                    },
                };
                if let Err(err) = sink.send(frame).await {
                    debug!(peer = %peer_id, error = %err, "connection write failed");
                    break;
                }
            }
            writer_closed.cancel();
        });

        conn
    }

    /// Remote peer id.
    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Torrent this connection serves.
    #[must_use]
    pub const fn info_hash(&self) -> InfoHash {
        self.info_hash
    }

    /// Whether the remote side dialed us.
    #[must_use]
    pub const fn opened_by_remote(&self) -> bool {
        self.opened_by_remote
    }

    /// When the connection was established.
    #[must_use]
    pub const fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether this connection has carried any verified piece yet.
    #[must_use]
    pub fn is_transmitting(&self) -> bool {
        lock(&self.last_good_piece_received).is_some()
    }

    /// Snapshot of the peer's announced bitfield.
    #[must_use]
    pub fn peer_bitfield(&self) -> Bitfield {
        lock(&self.peer_bitfield).clone()
    }

    /// Record that the peer announced holding a piece.
    pub fn mark_peer_piece(&self, index: u32) {
        lock(&self.peer_bitfield).set(index);
    }

    /// Record a verified piece received on this connection.
    pub fn touch_received(&self) {
        *lock(&self.last_good_piece_received) = Some(Instant::now());
    }

    /// Record a piece payload sent on this connection.
    pub fn touch_sent(&self) {
        *lock(&self.last_piece_sent) = Some(Instant::now());
    }

    /// Most recent activity in either direction, or the creation time.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        let received = lock(&self.last_good_piece_received).unwrap_or(self.created_at);
        let sent = lock(&self.last_piece_sent).unwrap_or(self.created_at);
        received.max(sent)
    }

    /// Queue a frame for the writer.
    ///
    /// # Errors
    ///
    /// `SendBufferFull` when the bounded sender channel is full,
    /// `ConnClosed` when the connection is gone.
    pub fn send(&self, frame: Frame) -> SchedulerResult<()> {
        if self.closed.is_cancelled() {
            return Err(SchedulerError::ConnClosed);
        }
        self.out_tx.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SchedulerError::SendBufferFull,
            mpsc::error::TrySendError::Closed(_) => SchedulerError::ConnClosed,
        })
    }

    /// Take the inbound frame channel; the dispatcher's feeder owns it.
    #[must_use]
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<Frame>> {
        lock(&self.in_rx).take()
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Resolves once the connection is closed from any side.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Whether the connection is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl std::fmt::Debug for Conn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("peer_id", &self.peer_id)
            .field("info_hash", &self.info_hash)
            .field("opened_by_remote", &self.opened_by_remote)
            .finish_non_exhaustive()
    }
}
