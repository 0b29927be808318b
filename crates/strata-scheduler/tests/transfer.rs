//! End-to-end piece exchange between live schedulers over loopback TCP.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use strata_config::{BlacklistConfig, SchedulerConfig};
use strata_core::{InfoHash, MetaInfo};
use strata_scheduler::{
    AnnounceClient, AnnounceRequest, DiskArchive, PeerInfo, SchedulerHandle, Torrent,
    TorrentArchive,
};
use strata_telemetry::Metrics;
use strata_test_support::fixtures;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

/// Shared in-memory tracker: every announce registers the caller and
/// returns everyone registered for the hash, the caller included.
#[derive(Default)]
struct Tracker {
    peers: Mutex<HashMap<InfoHash, HashMap<strata_core::PeerId, PeerInfo>>>,
}

struct TrackerClient(Arc<Tracker>);

#[async_trait]
impl AnnounceClient for TrackerClient {
    async fn announce(&self, request: &AnnounceRequest) -> anyhow::Result<Vec<PeerInfo>> {
        let mut peers = match self.0.peers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = peers.entry(request.info_hash).or_default();
        entry.insert(
            request.peer_id,
            PeerInfo {
                peer_id: request.peer_id,
                ip: request.ip.clone(),
                port: request.port,
            },
        );
        Ok(entry.values().cloned().collect())
    }
}

struct Peer {
    handle: SchedulerHandle,
    archive: Arc<DiskArchive>,
    _dir: TempDir,
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        announce_interval: Duration::from_millis(50),
        preemption_interval: Duration::from_secs(3600),
        idle_conn_ttl: Duration::from_secs(3600),
        conn_ttl: Duration::from_secs(3600),
        idle_seeder_ttl: Duration::from_secs(3600),
        dial_timeout: Duration::from_secs(2),
        handshake_timeout: Duration::from_secs(2),
        blacklist: BlacklistConfig {
            initial_backoff: Duration::from_millis(100),
            backoff_multiplier: 2,
            max_backoff: Duration::from_secs(1),
            expired_entry_ttl: Duration::from_secs(60),
            cleanup_interval: Duration::from_secs(3600),
        },
        ..SchedulerConfig::default()
    }
}

async fn start_peer(tracker: &Arc<Tracker>, config: SchedulerConfig) -> Peer {
    let dir = fixtures::scratch_dir();
    let archive = Arc::new(DiskArchive::new(dir.path()).expect("archive"));
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let handle = SchedulerHandle::start(
        config,
        archive.clone(),
        Arc::new(TrackerClient(Arc::clone(tracker))),
        listener,
        Metrics::new().expect("metrics"),
    )
    .await
    .expect("scheduler");
    Peer {
        handle,
        archive,
        _dir: dir,
    }
}

fn read_all(archive: &DiskArchive, meta: &MetaInfo) -> Vec<u8> {
    let torrent = archive.get(meta.info_hash()).expect("torrent present");
    let mut content = Vec::new();
    for index in 0..meta.num_pieces() {
        content.extend(torrent.read_piece(index).expect("piece readable"));
    }
    content
}

#[tokio::test]
async fn seeder_to_leecher_transfer_is_byte_identical() {
    let tracker = Arc::new(Tracker::default());
    let (content, meta) = fixtures::torrent("blob", 1024, 256, 42);

    let seeder = start_peer(&tracker, test_config()).await;
    seeder.archive.seed(meta.clone(), &content).expect("seed");
    timeout(Duration::from_secs(5), seeder.handle.add_torrent(meta.clone()))
        .await
        .expect("seeder add should resolve immediately")
        .expect("seeder add");

    let leecher = start_peer(&tracker, test_config()).await;
    timeout(
        Duration::from_secs(30),
        leecher.handle.add_torrent(meta.clone()),
    )
    .await
    .expect("download timed out")
    .expect("download failed");

    let torrent = leecher.archive.get(meta.info_hash()).expect("torrent");
    assert!(torrent.is_complete());
    assert_eq!(read_all(&leecher.archive, &meta), content);
    assert_eq!(read_all(&seeder.archive, &meta), content);

    seeder.handle.stop().await;
    leecher.handle.stop().await;
}

#[tokio::test]
async fn trickle_down_spreads_pieces_beyond_the_seeder() {
    let tracker = Arc::new(Tracker::default());
    let (content, meta) = fixtures::torrent("trickle", 2048, 256, 7);

    let mut seeder_config = test_config();
    seeder_config.max_open_conns_per_torrent = 1;
    let seeder = start_peer(&tracker, seeder_config).await;
    seeder.archive.seed(meta.clone(), &content).expect("seed");
    seeder
        .handle
        .add_torrent(meta.clone())
        .await
        .expect("seeder add");

    let mut peer_config = test_config();
    peer_config.max_open_conns_per_torrent = 2;
    let a = start_peer(&tracker, peer_config.clone()).await;
    // Stagger the announce clocks so the two leechers do not dial each
    // other in lockstep forever.
    sleep(Duration::from_millis(20)).await;
    let mut b_config = peer_config;
    b_config.announce_interval = Duration::from_millis(70);
    let b = start_peer(&tracker, b_config).await;

    let (a_done, b_done) = tokio::join!(
        timeout(Duration::from_secs(60), a.handle.add_torrent(meta.clone())),
        timeout(Duration::from_secs(60), b.handle.add_torrent(meta.clone())),
    );
    a_done.expect("a timed out").expect("a failed");
    b_done.expect("b timed out").expect("b failed");

    assert_eq!(read_all(&a.archive, &meta), content);
    assert_eq!(read_all(&b.archive, &meta), content);

    // The seeder admits one connection total, so exactly one of the two
    // leechers ends up attached to it.
    let seeder_id = seeder.handle.peer_id();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let a_snapshot = a.handle.inspect().await.expect("inspect a");
        let b_snapshot = b.handle.inspect().await.expect("inspect b");
        let a_to_seeder = a_snapshot
            .active
            .iter()
            .filter(|(peer, _)| *peer == seeder_id)
            .count();
        let b_to_seeder = b_snapshot
            .active
            .iter()
            .filter(|(peer, _)| *peer == seeder_id)
            .count();
        if a_to_seeder + b_to_seeder == 1 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "seeder connections never settled to exactly one: a={a_to_seeder} b={b_to_seeder}"
        );
        sleep(Duration::from_millis(100)).await;
    }

    seeder.handle.stop().await;
    a.handle.stop().await;
    b.handle.stop().await;
}

#[tokio::test]
async fn idle_torrents_and_conns_are_reclaimed() {
    let tracker = Arc::new(Tracker::default());
    let (content, meta) = fixtures::torrent("reclaim", 1024, 256, 13);

    let mut config = test_config();
    config.preemption_interval = Duration::from_millis(100);
    config.idle_conn_ttl = Duration::from_millis(300);
    config.idle_seeder_ttl = Duration::from_millis(800);

    let seeder = start_peer(&tracker, config.clone()).await;
    seeder.archive.seed(meta.clone(), &content).expect("seed");
    seeder
        .handle
        .add_torrent(meta.clone())
        .await
        .expect("seeder add");

    let leecher = start_peer(&tracker, config).await;
    timeout(
        Duration::from_secs(30),
        leecher.handle.add_torrent(meta.clone()),
    )
    .await
    .expect("download timed out")
    .expect("download failed");

    // Both sides idle out: first the connections, then the dispatchers.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    loop {
        let seeder_snapshot = seeder.handle.inspect().await.expect("inspect seeder");
        let leecher_snapshot = leecher.handle.inspect().await.expect("inspect leecher");
        let drained = seeder_snapshot.dispatchers.is_empty()
            && leecher_snapshot.dispatchers.is_empty()
            && seeder_snapshot.active.is_empty()
            && leecher_snapshot.active.is_empty();
        if drained {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "idle resources were never reclaimed"
        );
        sleep(Duration::from_millis(100)).await;
    }

    // The data itself stays on disk.
    assert_eq!(read_all(&leecher.archive, &meta), content);

    seeder.handle.stop().await;
    leecher.handle.stop().await;
}

#[tokio::test]
async fn unknown_torrents_are_refused() {
    let tracker = Arc::new(Tracker::default());
    let (content, meta) = fixtures::torrent("known", 512, 256, 3);
    let (_, unknown_meta) = fixtures::torrent("unknown", 512, 256, 4);

    let seeder = start_peer(&tracker, test_config()).await;
    seeder.archive.seed(meta.clone(), &content).expect("seed");
    seeder.handle.add_torrent(meta).await.expect("seeder add");

    // Register the seeder for a hash it does not actually have, so the
    // leecher dials it and receives an unknown-torrent refusal.
    {
        let mut peers = tracker.peers.lock().expect("tracker lock");
        peers.entry(unknown_meta.info_hash()).or_default().insert(
            seeder.handle.peer_id(),
            PeerInfo {
                peer_id: seeder.handle.peer_id(),
                ip: "127.0.0.1".to_string(),
                port: seeder.handle.port(),
            },
        );
    }

    let leecher = start_peer(&tracker, test_config()).await;
    let outcome = timeout(
        Duration::from_secs(2),
        leecher.handle.add_torrent(unknown_meta),
    )
    .await;
    assert!(outcome.is_err(), "download of an unseeded torrent resolved");

    // The refusal counts as a failed handshake and blacklists the seeder.
    let snapshot = leecher.handle.inspect().await.expect("inspect");
    assert!(snapshot.blacklist_len >= 1);
    assert!(snapshot.active.is_empty());

    seeder.handle.stop().await;
    leecher.handle.stop().await;
}
