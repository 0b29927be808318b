//! Tracker announces.
//!
//! Each dispatcher cycles through three states: waiting (not yet eligible),
//! ready (next up), and in-flight (an announce round trip is running). One
//! torrent is announced per tick; the response or failure event returns the
//! torrent to the waiting state with a fresh eligibility time.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_core::{InfoHash, PeerId};

/// One peer as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer identity.
    pub peer_id: PeerId,
    /// Address peers should dial.
    pub ip: String,
    /// Port peers should dial.
    pub port: u16,
}

impl PeerInfo {
    /// Dialable `ip:port` form.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// Parameters reported to the tracker.
#[derive(Debug, Clone)]
pub struct AnnounceRequest {
    /// Torrent being announced.
    pub info_hash: InfoHash,
    /// This host's peer id.
    pub peer_id: PeerId,
    /// Address peers should dial.
    pub ip: String,
    /// Port peers should dial.
    pub port: u16,
    /// Datacenter label.
    pub dc: String,
    /// Bytes downloaded so far.
    pub downloaded: u64,
    /// Bytes still missing.
    pub left: u64,
}

/// Client half of the tracker protocol.
#[async_trait]
pub trait AnnounceClient: Send + Sync {
    /// Report our state and fetch the current peer list.
    ///
    /// # Errors
    ///
    /// Transport failures, non-200 statuses, and undecodable bodies.
    async fn announce(&self, request: &AnnounceRequest) -> anyhow::Result<Vec<PeerInfo>>;
}

#[derive(Debug, Deserialize)]
struct AnnounceResponseBody {
    peers: Vec<PeerInfo>,
}

/// `reqwest`-backed tracker client.
pub struct HttpAnnounceClient {
    base: String,
    http: reqwest::Client,
    timeout: Duration,
}

impl HttpAnnounceClient {
    /// Client for a tracker address, e.g. `http://tracker:7602`.
    #[must_use]
    pub fn new(addr: &str, timeout: Duration) -> Self {
        let base = if addr.starts_with("http://") || addr.starts_with("https://") {
            addr.trim_end_matches('/').to_string()
        } else {
            format!("http://{addr}")
        };
        Self {
            base,
            http: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl AnnounceClient for HttpAnnounceClient {
    async fn announce(&self, request: &AnnounceRequest) -> anyhow::Result<Vec<PeerInfo>> {
        let response = self
            .http
            .get(format!("{}/announce", self.base))
            .timeout(self.timeout)
            .query(&[
                ("info_hash", request.info_hash.to_string()),
                ("peer_id", request.peer_id.to_string()),
                ("port", request.port.to_string()),
                ("ip", request.ip.clone()),
                ("dc", request.dc.clone()),
                ("downloaded", request.downloaded.to_string()),
                ("left", request.left.to_string()),
                ("uploaded", "0".to_string()),
                ("event", String::new()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            anyhow::bail!("tracker answered {}", response.status());
        }
        let body = response.bytes().await?;
        let decoded: AnnounceResponseBody = serde_bencode::from_bytes(&body)?;
        Ok(decoded.peers)
    }
}

/// Three-state announce scheduler over dispatchers.
#[derive(Debug, Default)]
pub struct AnnounceQueue {
    ready: VecDeque<InfoHash>,
    waiting: HashMap<InfoHash, Instant>,
    in_flight: HashSet<InfoHash>,
    members: HashSet<InfoHash>,
}

impl AnnounceQueue {
    /// An empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a torrent; it becomes immediately eligible.
    pub fn add(&mut self, info_hash: InfoHash) {
        if self.members.insert(info_hash) {
            self.ready.push_back(info_hash);
        }
    }

    /// Promote due torrents and pull the next one to announce.
    pub fn next(&mut self, now: Instant) -> Option<InfoHash> {
        let due: Vec<InfoHash> = self
            .waiting
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(hash, _)| *hash)
            .collect();
        for hash in due {
            self.waiting.remove(&hash);
            self.ready.push_back(hash);
        }

        let hash = self.ready.pop_front()?;
        self.in_flight.insert(hash);
        Some(hash)
    }

    /// Record an announce round trip finishing; the torrent becomes
    /// eligible again at `next_at`.
    pub fn done(&mut self, info_hash: InfoHash, next_at: Instant) {
        self.in_flight.remove(&info_hash);
        if self.members.contains(&info_hash) {
            self.waiting.insert(info_hash, next_at);
        }
    }

    /// Forget a torrent entirely.
    pub fn eject(&mut self, info_hash: InfoHash) {
        self.members.remove(&info_hash);
        self.waiting.remove(&info_hash);
        self.in_flight.remove(&info_hash);
        self.ready.retain(|hash| *hash != info_hash);
    }

    /// Number of registered torrents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether no torrents are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn hash(byte: u8) -> InfoHash {
        InfoHash::from_bytes([byte; 32])
    }

    #[test]
    fn queue_cycles_through_the_three_states() {
        let mut queue = AnnounceQueue::new();
        let start = Instant::now();
        let a = hash(1);

        queue.add(a);
        assert_eq!(queue.next(start), Some(a));
        // In flight: nothing else to pull.
        assert_eq!(queue.next(start), None);

        queue.done(a, start + Duration::from_secs(3));
        // Not yet eligible.
        assert_eq!(queue.next(start + Duration::from_secs(1)), None);
        // Eligible again after the interval.
        assert_eq!(queue.next(start + Duration::from_secs(3)), Some(a));
    }

    #[test]
    fn duplicate_adds_are_ignored() {
        let mut queue = AnnounceQueue::new();
        let a = hash(2);
        queue.add(a);
        queue.add(a);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.next(Instant::now()), Some(a));
        assert_eq!(queue.next(Instant::now()), None);
    }

    #[test]
    fn ejected_torrents_never_come_back() {
        let mut queue = AnnounceQueue::new();
        let start = Instant::now();
        let a = hash(3);

        queue.add(a);
        assert_eq!(queue.next(start), Some(a));
        queue.eject(a);
        queue.done(a, start);
        assert!(queue.is_empty());
        assert_eq!(queue.next(start + Duration::from_secs(10)), None);
    }

    #[test]
    fn interleaves_multiple_torrents() {
        let mut queue = AnnounceQueue::new();
        let start = Instant::now();
        let a = hash(4);
        let b = hash(5);

        queue.add(a);
        queue.add(b);
        assert_eq!(queue.next(start), Some(a));
        assert_eq!(queue.next(start), Some(b));
        queue.done(b, start + Duration::from_secs(1));
        queue.done(a, start + Duration::from_secs(2));

        assert_eq!(queue.next(start + Duration::from_secs(1)), Some(b));
        assert_eq!(queue.next(start + Duration::from_secs(2)), Some(a));
    }

    #[tokio::test]
    async fn http_client_round_trips_a_bencoded_peer_list() {
        let mut server = mockito::Server::new_async().await;
        let peers = vec![
            PeerInfo {
                peer_id: PeerId::random(),
                ip: "10.0.0.1".to_string(),
                port: 7601,
            },
            PeerInfo {
                peer_id: PeerId::random(),
                ip: "10.0.0.2".to_string(),
                port: 7601,
            },
        ];
        let body = serde_bencode::to_bytes(&BencodedPeers {
            peers: peers.clone(),
        })
        .unwrap();

        let mock = server
            .mock("GET", "/announce")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = HttpAnnounceClient::new(&server.url(), Duration::from_secs(5));
        let request = AnnounceRequest {
            info_hash: hash(6),
            peer_id: PeerId::random(),
            ip: "127.0.0.1".to_string(),
            port: 7601,
            dc: "dc1".to_string(),
            downloaded: 0,
            left: 1024,
        };
        let returned = client.announce(&request).await.unwrap();
        assert_eq!(returned, peers);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_statuses_are_failures() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/announce")
            .match_query(Matcher::Any)
            .with_status(503)
            .create_async()
            .await;

        let client = HttpAnnounceClient::new(&server.url(), Duration::from_secs(5));
        let request = AnnounceRequest {
            info_hash: hash(7),
            peer_id: PeerId::random(),
            ip: "127.0.0.1".to_string(),
            port: 7601,
            dc: "dc1".to_string(),
            downloaded: 0,
            left: 0,
        };
        assert!(client.announce(&request).await.is_err());
    }

    #[derive(Serialize)]
    struct BencodedPeers {
        peers: Vec<PeerInfo>,
    }
}
