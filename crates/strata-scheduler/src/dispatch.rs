//! Per-torrent dispatchers.
//!
//! A dispatcher fans piece-level messages between every connection attached
//! to one torrent. It runs outside the event loop: each attached connection
//! gets a feeder task that drains the connection's receiver channel and
//! dispatches messages, so its maps are guarded by their own locks rather
//! than by loop confinement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use bytes::Bytes;
use strata_core::PeerId;
use strata_telemetry::Metrics;
use tracing::{debug, warn};

use crate::conn::Conn;
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::{Event, EventSender};
use crate::storage::{StorageError, Torrent};
use crate::wire::{ErrorCode, Frame, Message};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Coordinates piece exchange for one torrent.
pub struct Dispatcher {
    torrent: Arc<dyn Torrent>,
    conns: Mutex<HashMap<PeerId, Arc<Conn>>>,
    completed: AtomicBool,
    last_conn_removed: Mutex<Instant>,
    events: EventSender,
    metrics: Metrics,
}

impl Dispatcher {
    /// Dispatcher for a torrent; created on its first connection or local
    /// request.
    #[must_use]
    pub fn new(torrent: Arc<dyn Torrent>, events: EventSender, metrics: Metrics) -> Arc<Self> {
        Arc::new(Self {
            torrent,
            conns: Mutex::new(HashMap::new()),
            completed: AtomicBool::new(false),
            last_conn_removed: Mutex::new(Instant::now()),
            events,
            metrics,
        })
    }

    /// The torrent this dispatcher serves.
    #[must_use]
    pub fn torrent(&self) -> Arc<dyn Torrent> {
        Arc::clone(&self.torrent)
    }

    /// Attach a connection: request every missing piece the peer claims,
    /// then start the feeder that dispatches its inbound messages.
    ///
    /// # Errors
    ///
    /// `HandshakeMismatch` when the connection serves a different torrent,
    /// `AlreadyActive` when this peer already has an attached connection.
    pub fn add_conn(self: &Arc<Self>, conn: Arc<Conn>) -> SchedulerResult<()> {
        if conn.info_hash() != self.torrent.info_hash() {
            return Err(SchedulerError::HandshakeMismatch {
                expected: self.torrent.info_hash(),
                got: conn.info_hash(),
            });
        }
        {
            let mut conns = lock(&self.conns);
            if let Some(existing) = conns.get(&conn.peer_id()) {
                if Arc::ptr_eq(existing, &conn) {
                    return Err(SchedulerError::AlreadyActive);
                }
                // A replaced conn whose feeder has not detached yet; the
                // late detach no-ops on the pointer guard in remove_conn.
            }
            conns.insert(conn.peer_id(), Arc::clone(&conn));
        }

        let peer_bitfield = conn.peer_bitfield();
        for index in self.torrent.bitfield().missing() {
            if !peer_bitfield.has(index) {
                continue;
            }
            if self.request_piece(&conn, index).is_err() {
                break;
            }
        }

        self.spawn_feeder(conn);
        Ok(())
    }

    /// Connections currently attached.
    #[must_use]
    pub fn conns(&self) -> Vec<Arc<Conn>> {
        lock(&self.conns).values().cloned().collect()
    }

    /// Latest piece activity across attached connections, falling back to
    /// the last detach time when none are attached.
    #[must_use]
    pub fn latest_activity(&self) -> Instant {
        let detached = *lock(&self.last_conn_removed);
        lock(&self.conns)
            .values()
            .map(|conn| conn.last_activity())
            .fold(detached, Instant::max)
    }

    fn spawn_feeder(self: &Arc<Self>, conn: Arc<Conn>) {
        let Some(mut receiver) = conn.take_receiver() else {
            warn!(peer = %conn.peer_id(), "connection receiver already claimed");
            return;
        };
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(frame) = receiver.recv().await {
                dispatcher.handle(&conn, frame);
            }
            dispatcher.remove_conn(&conn);
        });
    }

    fn remove_conn(&self, conn: &Arc<Conn>) {
        let mut conns = lock(&self.conns);
        if let Some(current) = conns.get(&conn.peer_id()) {
            if Arc::ptr_eq(current, conn) {
                conns.remove(&conn.peer_id());
                *lock(&self.last_conn_removed) = Instant::now();
            }
        }
    }

    fn handle(self: &Arc<Self>, conn: &Arc<Conn>, frame: Frame) {
        match frame.message {
            Message::AnnouncePiece { index } => self.handle_announce(conn, index),
            Message::PieceRequest {
                index,
                offset,
                length,
            } => self.handle_request(conn, index, offset, length),
            Message::PiecePayload { index, offset, .. } => {
                self.handle_payload(conn, index, offset, &frame.payload);
            }
            Message::CancelPiece { index } => {
                // Ordered delivery plus synchronous piece reads: the payload
                // is already queued by the time a cancel arrives.
                debug!(peer = %conn.peer_id(), index, "ignoring piece cancel");
            }
            Message::Error {
                index,
                code: ErrorCode::PieceRequestFailed,
                message,
            } => {
                debug!(peer = %conn.peer_id(), index, message, "peer failed our piece request");
                if !self.torrent.has_piece(index) {
                    let _ = self.request_piece(conn, index);
                }
            }
            Message::Error { index, code, message } => {
                warn!(peer = %conn.peer_id(), index, ?code, message, "peer reported an error");
                conn.close();
            }
            Message::Bitfield { .. } => {
                warn!(peer = %conn.peer_id(), "unexpected bitfield on established connection");
            }
        }
    }

    fn handle_announce(&self, conn: &Arc<Conn>, index: u32) {
        if index >= self.torrent.meta().num_pieces() {
            warn!(peer = %conn.peer_id(), index, "piece announce out of range");
            return;
        }
        conn.mark_peer_piece(index);
        if !self.torrent.has_piece(index) {
            let _ = self.request_piece(conn, index);
        }
    }

    fn handle_request(&self, conn: &Arc<Conn>, index: u32, offset: u64, length: u64) {
        let whole_piece = self
            .torrent
            .meta()
            .piece_length_at(index)
            .map_or(false, |want| offset == 0 && length == want);
        if !whole_piece {
            debug!(peer = %conn.peer_id(), index, offset, length, "rejecting chunked piece request");
            self.send_piece_error(conn, index, "chunked piece requests are unsupported");
            return;
        }

        match self.torrent.read_piece(index) {
            Ok(data) => {
                let frame = Frame::piece(index, Bytes::from(data));
                if conn.send(frame).is_ok() {
                    conn.touch_sent();
                    self.metrics.record_piece_sent();
                }
            }
            Err(err) => {
                debug!(peer = %conn.peer_id(), index, error = %err, "piece read failed");
                self.send_piece_error(conn, index, "piece unavailable");
            }
        }
    }

    fn handle_payload(self: &Arc<Self>, conn: &Arc<Conn>, index: u32, offset: u64, payload: &[u8]) {
        if offset != 0 {
            warn!(peer = %conn.peer_id(), index, offset, "dropping chunked piece payload");
            return;
        }
        match self.torrent.write_piece(index, payload) {
            Ok(()) => {}
            Err(StorageError::HashMismatch { .. }) => {
                warn!(peer = %conn.peer_id(), index, "dropping piece that failed verification");
                return;
            }
            Err(err) => {
                // The peer re-announces, or another peer supplies the piece.
                warn!(peer = %conn.peer_id(), index, error = %err, "dropping unwritable piece");
                return;
            }
        }

        conn.touch_received();
        self.metrics.record_piece_received();

        let sender = conn.peer_id();
        for other in self.conns() {
            if other.peer_id() == sender {
                continue;
            }
            let announce = Frame::from_message(Message::AnnouncePiece { index });
            if let Err(err) = other.send(announce) {
                debug!(peer = %other.peer_id(), index, error = %err, "piece announce not delivered");
            }
        }

        if self.torrent.is_complete() && !self.completed.swap(true, Ordering::SeqCst) {
            self.events.send_spawned(Event::CompletedDispatcher {
                info_hash: self.torrent.info_hash(),
            });
        }
    }

    fn request_piece(&self, conn: &Arc<Conn>, index: u32) -> SchedulerResult<()> {
        let length = self
            .torrent
            .meta()
            .piece_length_at(index)
            .map_err(StorageError::from)?;
        conn.send(Frame::from_message(Message::PieceRequest {
            index,
            offset: 0,
            length,
        }))
    }

    fn send_piece_error(&self, conn: &Arc<Conn>, index: u32, message: &str) {
        let frame = Frame::from_message(Message::Error {
            index,
            code: ErrorCode::PieceRequestFailed,
            message: message.to_string(),
        });
        if let Err(err) = conn.send(frame) {
            debug!(peer = %conn.peer_id(), index, error = %err, "piece error not delivered");
        }
    }
}
