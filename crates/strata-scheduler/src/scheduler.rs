//! The scheduler event loop and its public handle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;

use futures::SinkExt;
use strata_config::SchedulerConfig;
use strata_core::{InfoHash, MetaInfo, PeerId};
use strata_telemetry::Metrics;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::announce::{AnnounceClient, AnnounceQueue, AnnounceRequest, PeerInfo};
use crate::conn::Conn;
use crate::connstate::{ConnState, MoveOutcome};
use crate::dispatch::Dispatcher;
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::{Event, EventSender, StateSnapshot};
use crate::handshake::{self, Handshake, WireStream};
use crate::storage::{Torrent, TorrentArchive};
use crate::wire::{ErrorCode, Frame, Message};

/// Public face of a running scheduler.
pub struct SchedulerHandle {
    events: EventSender,
    done: CancellationToken,
    peer_id: PeerId,
    port: u16,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl SchedulerHandle {
    /// Start a scheduler: the event loop plus the incoming-socket listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's local address cannot be read.
    pub async fn start(
        config: SchedulerConfig,
        archive: Arc<dyn TorrentArchive>,
        announce_client: Arc<dyn AnnounceClient>,
        listener: TcpListener,
        metrics: Metrics,
    ) -> SchedulerResult<Self> {
        let peer_id = PeerId::random();
        let port = listener.local_addr()?.port();
        let done = CancellationToken::new();
        let (tx, rx) = mpsc::channel(config.event_buffer);
        let events = EventSender::new(tx, done.clone());

        let listen_task = tokio::spawn(listen_loop(
            listener,
            events.clone(),
            done.clone(),
            config.handshake_timeout,
        ));

        let scheduler = Scheduler {
            conn_state: ConnState::new(
                peer_id,
                config.max_open_conns_per_torrent,
                config.blacklist.clone(),
            ),
            config,
            peer_id,
            port,
            archive,
            announce_client,
            events: events.clone(),
            dispatchers: HashMap::new(),
            waiters: HashMap::new(),
            announce_queue: AnnounceQueue::new(),
            metrics,
        };
        let loop_task = tokio::spawn(run_loop(scheduler, rx, done.clone()));

        info!(peer_id = %peer_id, port, "scheduler started");
        Ok(Self {
            events,
            done,
            peer_id,
            port,
            tasks: StdMutex::new(vec![listen_task, loop_task]),
        })
    }

    /// Request a torrent; resolves when this host holds every piece.
    ///
    /// # Errors
    ///
    /// `Shutdown` if the scheduler stops first; storage failures from
    /// torrent creation.
    pub async fn add_torrent(&self, meta: MetaInfo) -> SchedulerResult<()> {
        let (result, receiver) = oneshot::channel();
        self.events.send(Event::NewTorrent { meta, result }).await;
        receiver.await.map_err(|_| SchedulerError::Shutdown)?
    }

    /// Capture a snapshot of the connection state.
    ///
    /// # Errors
    ///
    /// `Shutdown` if the scheduler stops first.
    pub async fn inspect(&self) -> SchedulerResult<StateSnapshot> {
        let (result, receiver) = oneshot::channel();
        self.events.send(Event::Inspect { result }).await;
        receiver.await.map_err(|_| SchedulerError::Shutdown)
    }

    /// This scheduler's peer id.
    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Port the listener is bound to.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Stop the scheduler and wait for its tasks.
    pub async fn stop(&self) {
        self.done.cancel();
        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "scheduler task exited abnormally");
            }
        }
    }
}

async fn listen_loop(
    listener: TcpListener,
    events: EventSender,
    done: CancellationToken,
    handshake_timeout: std::time::Duration,
) {
    loop {
        let accepted = tokio::select! {
            () = done.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((socket, addr)) => {
                let events = events.clone();
                tokio::spawn(async move {
                    match handshake::read_remote(socket, handshake_timeout).await {
                        Ok((stream, handshake)) => {
                            events
                                .send(Event::IncomingHandshake { stream, handshake })
                                .await;
                        }
                        Err(err) => {
                            debug!(peer_addr = %addr, error = %err, "incoming handshake failed");
                        }
                    }
                });
            }
            Err(err) => {
                warn!(error = %err, "listener accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

async fn run_loop(mut scheduler: Scheduler, mut rx: mpsc::Receiver<Event>, done: CancellationToken) {
    let mut announce_tick = tokio::time::interval(scheduler.config.announce_interval);
    let mut preemption_tick = tokio::time::interval(scheduler.config.preemption_interval);
    let mut blacklist_tick = tokio::time::interval(scheduler.config.blacklist.cleanup_interval);
    announce_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    preemption_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    blacklist_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = done.cancelled() => break,
            event = rx.recv() => match event {
                Some(event) => scheduler.handle(event),
                None => break,
            },
            _ = announce_tick.tick() => scheduler.handle(Event::AnnounceTick),
            _ = preemption_tick.tick() => scheduler.handle(Event::PreemptionTick),
            _ = blacklist_tick.tick() => scheduler.handle(Event::BlacklistCleanupTick),
        }
    }
    scheduler.shutdown();
}

/// All mutable scheduler state. Confined to the loop task; handlers never
/// send events inline, they spawn.
struct Scheduler {
    config: SchedulerConfig,
    peer_id: PeerId,
    port: u16,
    archive: Arc<dyn TorrentArchive>,
    announce_client: Arc<dyn AnnounceClient>,
    events: EventSender,
    conn_state: ConnState,
    dispatchers: HashMap<InfoHash, Arc<Dispatcher>>,
    waiters: HashMap<InfoHash, Vec<oneshot::Sender<SchedulerResult<()>>>>,
    announce_queue: AnnounceQueue,
    metrics: Metrics,
}

impl Scheduler {
    fn handle(&mut self, event: Event) {
        trace!(kind = event.kind(), "handling event");
        match event {
            Event::IncomingHandshake { stream, handshake } => {
                self.handle_incoming_handshake(stream, handshake);
            }
            Event::IncomingConn { conn, torrent } | Event::OutgoingConn { conn, torrent } => {
                self.handle_established_conn(conn, torrent);
            }
            Event::FailedHandshake { peer_id, info_hash } => {
                self.handle_failed_handshake(peer_id, info_hash);
            }
            Event::ClosedConn { conn } => self.handle_closed_conn(&conn),
            Event::AnnounceTick => self.handle_announce_tick(),
            Event::AnnounceResponse { info_hash, peers } => {
                self.handle_announce_response(info_hash, peers);
            }
            Event::AnnounceFailure { info_hash } => self.handle_announce_failure(info_hash),
            Event::NewTorrent { meta, result } => self.handle_new_torrent(meta, result),
            Event::CompletedDispatcher { info_hash } => self.handle_completed(info_hash),
            Event::PreemptionTick => self.handle_preemption(),
            Event::BlacklistCleanupTick => {
                self.conn_state.cleanup_blacklist(Instant::now());
            }
            Event::Inspect { result } => {
                let _ = result.send(self.snapshot());
            }
        }
    }

    fn handle_new_torrent(
        &mut self,
        meta: MetaInfo,
        result: oneshot::Sender<SchedulerResult<()>>,
    ) {
        let torrent = match self.archive.create(meta) {
            Ok(torrent) => torrent,
            Err(err) => {
                let _ = result.send(Err(err.into()));
                return;
            }
        };
        let info_hash = torrent.info_hash();
        self.ensure_dispatcher(&torrent);

        if torrent.is_complete() {
            let _ = result.send(Ok(()));
        } else {
            self.waiters.entry(info_hash).or_default().push(result);
        }
    }

    fn handle_incoming_handshake(&mut self, stream: WireStream, handshake: Handshake) {
        let peer_id = handshake.peer_id;
        let info_hash = handshake.info_hash;

        if let Err(err) = self
            .conn_state
            .add_pending(peer_id, info_hash, Instant::now())
        {
            debug!(peer = %peer_id, error = %err, "rejecting incoming handshake");
            return;
        }

        let Some(torrent) = self.archive.get(info_hash) else {
            self.conn_state.delete_pending(peer_id, info_hash);
            tokio::spawn(async move {
                let mut stream = stream;
                let refusal = Frame::from_message(Message::Error {
                    index: 0,
                    code: ErrorCode::UnknownTorrent,
                    message: format!("torrent {info_hash} not present"),
                });
                if let Err(err) = stream.send(refusal).await {
                    debug!(peer = %peer_id, error = %err, "unknown-torrent refusal not sent");
                }
            });
            return;
        };

        let local = Handshake::for_torrent(self.peer_id, &torrent);
        let events = self.events.clone();
        let sender_buffer = self.config.sender_buffer;
        let receiver_buffer = self.config.receiver_buffer;
        tokio::spawn(async move {
            let mut stream = stream;
            match handshake::respond(&mut stream, &local).await {
                Ok(()) => {
                    let conn = Conn::spawn(
                        stream,
                        peer_id,
                        info_hash,
                        true,
                        handshake.bitfield,
                        sender_buffer,
                        receiver_buffer,
                    );
                    events.send(Event::IncomingConn { conn, torrent }).await;
                }
                Err(err) => {
                    debug!(peer = %peer_id, error = %err, "handshake reply failed");
                    events
                        .send(Event::FailedHandshake { peer_id, info_hash })
                        .await;
                }
            }
        });
    }

    fn handle_established_conn(&mut self, conn: Arc<Conn>, torrent: Arc<dyn Torrent>) {
        match self.conn_state.move_pending_to_active(&conn) {
            Ok(MoveOutcome::Activated) => {}
            Ok(MoveOutcome::Replaced(loser)) => loser.close(),
            Ok(MoveOutcome::Rejected) => {
                conn.close();
                return;
            }
            Err(err) => {
                debug!(peer = %conn.peer_id(), error = %err, "dropping unexpected connection");
                conn.close();
                return;
            }
        }

        let dispatcher = self.ensure_dispatcher(&torrent);
        if let Err(err) = dispatcher.add_conn(Arc::clone(&conn)) {
            debug!(peer = %conn.peer_id(), error = %err, "dispatcher refused connection");
            self.conn_state.delete_active(&conn);
            conn.close();
            return;
        }

        let events = self.events.clone();
        let monitored = Arc::clone(&conn);
        tokio::spawn(async move {
            monitored.closed().await;
            events.send(Event::ClosedConn { conn: monitored }).await;
        });
        self.update_conn_gauge();
    }

    fn handle_failed_handshake(&mut self, peer_id: PeerId, info_hash: InfoHash) {
        self.conn_state.delete_pending(peer_id, info_hash);
        self.conn_state.blacklist(peer_id, info_hash, Instant::now());
        self.metrics.record_blacklist_addition();
    }

    fn handle_closed_conn(&mut self, conn: &Arc<Conn>) {
        self.conn_state.delete_active(conn);
        self.update_conn_gauge();
    }

    fn handle_announce_tick(&mut self) {
        let Some(info_hash) = self.announce_queue.next(Instant::now()) else {
            return;
        };
        let Some(dispatcher) = self.dispatchers.get(&info_hash) else {
            self.announce_queue.eject(info_hash);
            return;
        };

        let torrent = dispatcher.torrent();
        let left = torrent.bytes_left();
        let request = AnnounceRequest {
            info_hash,
            peer_id: self.peer_id,
            ip: self.config.advertise_ip.clone(),
            port: self.port,
            dc: self.config.datacenter.clone(),
            downloaded: torrent.meta().length().saturating_sub(left),
            left,
        };

        let client = Arc::clone(&self.announce_client);
        let events = self.events.clone();
        tokio::spawn(async move {
            match client.announce(&request).await {
                Ok(peers) => {
                    events
                        .send(Event::AnnounceResponse { info_hash, peers })
                        .await;
                }
                Err(err) => {
                    debug!(info_hash = %info_hash, error = %err, "announce failed");
                    events.send(Event::AnnounceFailure { info_hash }).await;
                }
            }
        });
    }

    fn handle_announce_response(&mut self, info_hash: InfoHash, peers: Vec<PeerInfo>) {
        self.announce_queue
            .done(info_hash, Instant::now() + self.config.announce_interval);
        let Some(dispatcher) = self.dispatchers.get(&info_hash) else {
            return;
        };
        let torrent = dispatcher.torrent();
        if torrent.is_complete() {
            // Seeders announce so leechers can find them, but they have
            // nothing to gain from dialing out themselves.
            return;
        }

        let now = Instant::now();
        for peer in peers {
            if peer.peer_id == self.peer_id {
                continue;
            }
            match self.conn_state.add_pending(peer.peer_id, info_hash, now) {
                Ok(()) => self.spawn_outgoing(peer, Arc::clone(&torrent)),
                Err(SchedulerError::AtCapacity) => break,
                Err(err) => {
                    trace!(peer = %peer.peer_id, error = %err, "skipping announced peer");
                }
            }
        }
    }

    fn handle_announce_failure(&mut self, info_hash: InfoHash) {
        self.metrics.record_announce_failure();
        self.announce_queue
            .done(info_hash, Instant::now() + self.config.announce_interval);
    }

    fn handle_completed(&mut self, info_hash: InfoHash) {
        info!(info_hash = %info_hash, "torrent complete, seeding");
        if let Some(waiters) = self.waiters.remove(&info_hash) {
            for waiter in waiters {
                let _ = waiter.send(Ok(()));
            }
        }
    }

    fn handle_preemption(&mut self) {
        let now = Instant::now();
        for conn in self.conn_state.active_conns() {
            if now.saturating_duration_since(conn.created_at()) > self.config.conn_ttl {
                debug!(peer = %conn.peer_id(), "closing connection past its ttl");
                conn.close();
                continue;
            }
            if now.saturating_duration_since(conn.last_activity()) > self.config.idle_conn_ttl {
                debug!(peer = %conn.peer_id(), "closing idle connection");
                conn.close();
            }
        }

        let idle: Vec<InfoHash> = self
            .dispatchers
            .iter()
            .filter(|(_, dispatcher)| {
                dispatcher.torrent().is_complete()
                    && now.saturating_duration_since(dispatcher.latest_activity())
                        > self.config.idle_seeder_ttl
            })
            .map(|(info_hash, _)| *info_hash)
            .collect();
        for info_hash in idle {
            if let Some(dispatcher) = self.dispatchers.remove(&info_hash) {
                self.announce_queue.eject(info_hash);
                for conn in dispatcher.conns() {
                    conn.close();
                }
                info!(info_hash = %info_hash, "reclaimed idle seeding torrent");
            }
        }
    }

    fn spawn_outgoing(&self, peer: PeerInfo, torrent: Arc<dyn Torrent>) {
        let local = Handshake::for_torrent(self.peer_id, &torrent);
        let info_hash = local.info_hash;
        let events = self.events.clone();
        let dial_timeout = self.config.dial_timeout;
        let handshake_timeout = self.config.handshake_timeout;
        let sender_buffer = self.config.sender_buffer;
        let receiver_buffer = self.config.receiver_buffer;

        tokio::spawn(async move {
            match handshake::dial(&peer.addr(), &local, dial_timeout, handshake_timeout).await {
                Ok((framed, remote)) if remote.peer_id == peer.peer_id => {
                    let conn = Conn::spawn(
                        framed,
                        remote.peer_id,
                        info_hash,
                        false,
                        remote.bitfield,
                        sender_buffer,
                        receiver_buffer,
                    );
                    events.send(Event::OutgoingConn { conn, torrent }).await;
                }
                Ok(_) => {
                    debug!(peer = %peer.peer_id, "peer answered with an unexpected id");
                    events
                        .send(Event::FailedHandshake {
                            peer_id: peer.peer_id,
                            info_hash,
                        })
                        .await;
                }
                Err(err) => {
                    debug!(peer = %peer.peer_id, error = %err, "outgoing handshake failed");
                    events
                        .send(Event::FailedHandshake {
                            peer_id: peer.peer_id,
                            info_hash,
                        })
                        .await;
                }
            }
        });
    }

    fn ensure_dispatcher(&mut self, torrent: &Arc<dyn Torrent>) -> Arc<Dispatcher> {
        let info_hash = torrent.info_hash();
        if let Some(dispatcher) = self.dispatchers.get(&info_hash) {
            return Arc::clone(dispatcher);
        }
        let dispatcher = Dispatcher::new(
            Arc::clone(torrent),
            self.events.clone(),
            self.metrics.clone(),
        );
        self.dispatchers.insert(info_hash, Arc::clone(&dispatcher));
        self.announce_queue.add(info_hash);
        dispatcher
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            active: self
                .conn_state
                .active_conns()
                .iter()
                .map(|conn| (conn.peer_id(), conn.info_hash()))
                .collect(),
            pending: self.conn_state.pending_keys(),
            dispatchers: self.dispatchers.keys().copied().collect(),
            blacklist_len: self.conn_state.blacklist_len(),
        }
    }

    fn update_conn_gauge(&self) {
        self.metrics
            .set_active_conns(i64::try_from(self.conn_state.active_conns().len()).unwrap_or(0));
    }

    fn shutdown(&mut self) {
        for conn in self.conn_state.active_conns() {
            conn.close();
        }
        self.dispatchers.clear();
        for (_, waiters) in self.waiters.drain() {
            for waiter in waiters {
                let _ = waiter.send(Err(SchedulerError::Shutdown));
            }
        }
    }
}
