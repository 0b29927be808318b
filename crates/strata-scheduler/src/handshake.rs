//! Handshake exchange.
//!
//! A handshake is a single `BITFIELD` message. The outgoing side sends then
//! reads; the incoming side reads, decides whether it knows the torrent,
//! and replies. No further `BITFIELD` is ever exchanged on an established
//! connection.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use strata_core::{Bitfield, InfoHash, PeerId};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use crate::error::{SchedulerError, SchedulerResult};
use crate::storage::Torrent;
use crate::wire::{Frame, Message, WireCodec};

/// The contents of one side's handshake.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// Sender's peer id.
    pub peer_id: PeerId,
    /// Torrent name, informational.
    pub name: String,
    /// Torrent identity.
    pub info_hash: InfoHash,
    /// Pieces the sender holds.
    pub bitfield: Bitfield,
}

impl Handshake {
    /// Handshake advertising this host's view of a torrent.
    #[must_use]
    pub fn for_torrent(peer_id: PeerId, torrent: &Arc<dyn Torrent>) -> Self {
        Self {
            peer_id,
            name: torrent.meta().name().to_string(),
            info_hash: torrent.info_hash(),
            bitfield: torrent.bitfield(),
        }
    }

    /// Wire form.
    #[must_use]
    pub fn message(&self) -> Message {
        Message::Bitfield {
            peer_id: self.peer_id,
            name: self.name.clone(),
            info_hash: self.info_hash,
            bitfield: self.bitfield.clone(),
        }
    }

    /// Parse a handshake out of the first frame on a connection.
    ///
    /// # Errors
    ///
    /// `UnexpectedMessage` for anything that is not a `BITFIELD`.
    pub fn from_message(message: Message) -> SchedulerResult<Self> {
        match message {
            Message::Bitfield {
                peer_id,
                name,
                info_hash,
                bitfield,
            } => Ok(Self {
                peer_id,
                name,
                info_hash,
                bitfield,
            }),
            _ => Err(SchedulerError::UnexpectedMessage),
        }
    }
}

/// Framed socket type used by every connection.
pub type WireStream = Framed<TcpStream, WireCodec>;

/// Dial a peer and run the outgoing half of the handshake.
///
/// # Errors
///
/// `Timeout` when the dial or exchange overruns its deadline,
/// `HandshakeMismatch` when the peer answers for a different torrent,
/// transport failures otherwise.
pub async fn dial(
    addr: &str,
    local: &Handshake,
    dial_timeout: Duration,
    handshake_timeout: Duration,
) -> SchedulerResult<(WireStream, Handshake)> {
    let socket = timeout(dial_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| SchedulerError::Timeout)??;
    let mut framed = Framed::new(socket, WireCodec::new());

    let remote = timeout(handshake_timeout, async {
        framed.send(Frame::from_message(local.message())).await?;
        let frame = framed
            .next()
            .await
            .ok_or(SchedulerError::ConnClosed)??;
        Handshake::from_message(frame.message)
    })
    .await
    .map_err(|_| SchedulerError::Timeout)??;

    if remote.info_hash != local.info_hash {
        return Err(SchedulerError::HandshakeMismatch {
            expected: local.info_hash,
            got: remote.info_hash,
        });
    }
    Ok((framed, remote))
}

/// Read the remote handshake off a freshly accepted socket.
///
/// # Errors
///
/// `Timeout` when nothing arrives in time, `UnexpectedMessage` for a
/// non-handshake first frame, transport failures otherwise.
pub async fn read_remote(
    socket: TcpStream,
    handshake_timeout: Duration,
) -> SchedulerResult<(WireStream, Handshake)> {
    let mut framed = Framed::new(socket, WireCodec::new());
    let remote = timeout(handshake_timeout, async {
        let frame = framed
            .next()
            .await
            .ok_or(SchedulerError::ConnClosed)??;
        Handshake::from_message(frame.message)
    })
    .await
    .map_err(|_| SchedulerError::Timeout)??;
    Ok((framed, remote))
}

/// Send our handshake on an incoming connection we accepted.
///
/// # Errors
///
/// Transport failures from the send.
pub async fn respond(framed: &mut WireStream, local: &Handshake) -> SchedulerResult<()> {
    framed
        .send(Frame::from_message(local.message()))
        .await
        .map_err(SchedulerError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DiskArchive, TorrentArchive};
    use strata_test_support::fixtures::{scratch_dir, torrent};

    #[tokio::test]
    async fn outgoing_and_incoming_sides_exchange_bitfields() {
        let dir = scratch_dir();
        let archive = DiskArchive::new(dir.path()).unwrap();
        let (content, meta) = torrent("blob", 1000, 256, 21);
        let seeder_torrent = archive.seed(meta.clone(), &content).unwrap();

        let leecher_dir = scratch_dir();
        let leecher_archive = DiskArchive::new(leecher_dir.path()).unwrap();
        let leecher_torrent = leecher_archive.create(meta).unwrap();

        let seeder_id = PeerId::random();
        let leecher_id = PeerId::random();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let seeder = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (mut framed, remote) = read_remote(socket, Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(remote.peer_id, leecher_id);
            assert_eq!(remote.bitfield.count(), 0);
            let local = Handshake::for_torrent(seeder_id, &seeder_torrent);
            respond(&mut framed, &local).await.unwrap();
        });

        let local = Handshake::for_torrent(leecher_id, &leecher_torrent);
        let (_framed, remote) = dial(
            &addr,
            &local,
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(remote.peer_id, seeder_id);
        assert!(remote.bitfield.is_complete());
        assert_eq!(remote.name, "blob");
        seeder.await.unwrap();
    }

    #[tokio::test]
    async fn info_hash_mismatch_is_fatal() {
        let dir = scratch_dir();
        let archive = DiskArchive::new(dir.path()).unwrap();
        let (content_a, meta_a) = torrent("blob-a", 512, 256, 1);
        let (content_b, meta_b) = torrent("blob-b", 512, 256, 2);
        let torrent_a = archive.seed(meta_a, &content_a).unwrap();
        let torrent_b = archive.seed(meta_b, &content_b).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let answering_id = PeerId::random();
        let answering = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (mut framed, _) = read_remote(socket, Duration::from_secs(5))
                .await
                .unwrap();
            let local = Handshake::for_torrent(answering_id, &torrent_b);
            respond(&mut framed, &local).await.unwrap();
        });

        let local = Handshake::for_torrent(PeerId::random(), &torrent_a);
        let err = dial(
            &addr,
            &local,
            Duration::from_secs(5),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SchedulerError::HandshakeMismatch { .. }));
        answering.await.unwrap();
    }
}
