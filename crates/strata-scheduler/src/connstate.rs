//! The connection state machine.
//!
//! States per `(peer, torrent)`: absent, pending (handshaking), active.
//! Blacklisting is an orthogonal annotation with its own backoff clock.
//! Pending and active connections both count against the per-torrent
//! capacity, so the cap bounds handshakes in flight as well as established
//! connections.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use strata_config::BlacklistConfig;
use strata_core::{InfoHash, PeerId};

use crate::blacklist::Blacklist;
use crate::conn::Conn;
use crate::error::{SchedulerError, SchedulerResult};

/// Result of promoting a pending connection.
#[derive(Debug)]
pub enum MoveOutcome {
    /// The connection became the active one for its key.
    Activated,
    /// The connection replaced an existing active one; close the loser.
    Replaced(Arc<Conn>),
    /// The existing active connection won; close the new one.
    Rejected,
}

/// All connection bookkeeping, owned by the event loop.
pub struct ConnState {
    local_peer_id: PeerId,
    max_open_conns_per_torrent: usize,
    capacity: HashMap<InfoHash, usize>,
    pending: HashSet<(PeerId, InfoHash)>,
    active: HashMap<(PeerId, InfoHash), Arc<Conn>>,
    blacklist: Blacklist,
}

impl ConnState {
    /// Fresh state for one scheduler.
    #[must_use]
    pub fn new(
        local_peer_id: PeerId,
        max_open_conns_per_torrent: usize,
        blacklist: BlacklistConfig,
    ) -> Self {
        Self {
            local_peer_id,
            max_open_conns_per_torrent,
            capacity: HashMap::new(),
            pending: HashSet::new(),
            active: HashMap::new(),
            blacklist: Blacklist::new(blacklist),
        }
    }

    /// Reserve a slot for a handshake in flight.
    ///
    /// A pending slot may coexist with a non-transmitting active connection
    /// for the same key: that is the simultaneous-handshake window, and the
    /// conflict is resolved by conn preference at promotion time. Once the
    /// active connection is transmitting, preference can never favor a
    /// newcomer, so the attempt is rejected here instead.
    ///
    /// # Errors
    ///
    /// `Blacklisted` with the remaining backoff, `AtCapacity` when the
    /// torrent's slots are exhausted, `AlreadyPending` on a duplicate
    /// handshake, `AlreadyActive` when the key's connection is transmitting.
    pub fn add_pending(
        &mut self,
        peer_id: PeerId,
        info_hash: InfoHash,
        now: Instant,
    ) -> SchedulerResult<()> {
        if let Some(remaining) = self.blacklist.remaining(peer_id, info_hash, now) {
            return Err(SchedulerError::Blacklisted { remaining });
        }
        let key = (peer_id, info_hash);
        if self.pending.contains(&key) {
            return Err(SchedulerError::AlreadyPending);
        }
        if let Some(active) = self.active.get(&key) {
            if active.is_transmitting() {
                return Err(SchedulerError::AlreadyActive);
            }
        }

        let capacity = self
            .capacity
            .entry(info_hash)
            .or_insert(self.max_open_conns_per_torrent);
        if *capacity == 0 {
            return Err(SchedulerError::AtCapacity);
        }
        *capacity -= 1;
        self.pending.insert(key);
        Ok(())
    }

    /// Release a pending slot after a failed handshake.
    pub fn delete_pending(&mut self, peer_id: PeerId, info_hash: InfoHash) {
        if self.pending.remove(&(peer_id, info_hash)) {
            self.release(info_hash);
        }
    }

    /// Promote a pending connection to active.
    ///
    /// On a key conflict with an existing active connection the new one wins
    /// iff the existing one is not yet transmitting, the two were opened by
    /// different sides, and the existing opener's peer id is smaller than
    /// the new opener's. Peer ids are totally ordered, so two hosts that
    /// handshake each other simultaneously reach the same verdict from
    /// opposite ends.
    ///
    /// # Errors
    ///
    /// `NotPending` when the key was never reserved.
    pub fn move_pending_to_active(&mut self, conn: &Arc<Conn>) -> SchedulerResult<MoveOutcome> {
        let key = (conn.peer_id(), conn.info_hash());
        if !self.pending.contains(&key) {
            return Err(SchedulerError::NotPending);
        }
        self.pending.remove(&key);

        if let Some(existing) = self.active.get(&key) {
            if self.prefer_new(existing, conn) {
                let loser = self
                    .active
                    .insert(key, Arc::clone(conn))
                    .unwrap_or_else(|| Arc::clone(conn));
                self.release(conn.info_hash());
                Ok(MoveOutcome::Replaced(loser))
            } else {
                self.release(conn.info_hash());
                Ok(MoveOutcome::Rejected)
            }
        } else {
            self.active.insert(key, Arc::clone(conn));
            Ok(MoveOutcome::Activated)
        }
    }

    /// Remove an active connection; a no-op if another connection has since
    /// taken the key.
    pub fn delete_active(&mut self, conn: &Arc<Conn>) -> bool {
        let key = (conn.peer_id(), conn.info_hash());
        let Some(current) = self.active.get(&key) else {
            return false;
        };
        if !Arc::ptr_eq(current, conn) {
            return false;
        }
        self.active.remove(&key);
        self.release(conn.info_hash());
        true
    }

    /// Blacklist a peer for a torrent.
    pub fn blacklist(&mut self, peer_id: PeerId, info_hash: InfoHash, now: Instant) {
        self.blacklist.add(peer_id, info_hash, now);
    }

    /// Drop blacklist entries long past expiration.
    pub fn cleanup_blacklist(&mut self, now: Instant) {
        self.blacklist.cleanup(now);
    }

    /// Snapshot of the active connections.
    #[must_use]
    pub fn active_conns(&self) -> Vec<Arc<Conn>> {
        self.active.values().cloned().collect()
    }

    /// Snapshot of the pending keys.
    #[must_use]
    pub fn pending_keys(&self) -> Vec<(PeerId, InfoHash)> {
        self.pending.iter().copied().collect()
    }

    /// Number of tracked blacklist entries.
    #[must_use]
    pub fn blacklist_len(&self) -> usize {
        self.blacklist.len()
    }

    /// Active plus pending count for one torrent.
    #[must_use]
    pub fn open_conns(&self, info_hash: InfoHash) -> usize {
        self.capacity
            .get(&info_hash)
            .map_or(0, |capacity| self.max_open_conns_per_torrent - capacity)
    }

    fn prefer_new(&self, existing: &Arc<Conn>, new: &Arc<Conn>) -> bool {
        !existing.is_transmitting()
            && existing.opened_by_remote() != new.opened_by_remote()
            && self.opener(existing) < self.opener(new)
    }

    fn opener(&self, conn: &Arc<Conn>) -> PeerId {
        if conn.opened_by_remote() {
            conn.peer_id()
        } else {
            self.local_peer_id
        }
    }

    fn release(&mut self, info_hash: InfoHash) {
        if let Some(capacity) = self.capacity.get_mut(&info_hash) {
            *capacity = (*capacity + 1).min(self.max_open_conns_per_torrent);
        }
    }
}
