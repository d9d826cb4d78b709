mod config;
mod notification;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc::Sender;
use tokio::time::{Instant, timeout};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

pub use config::*;
pub use notification::*;

use crate::error::{Error, Rejection, Result};
use crate::message::{Block, Handshake};
use crate::peer::connector::{self, Candidate};
use crate::peer::{Channel, Incoming, PeerChannel, PeerConnection};
use crate::piece::{Arrival, Blocks, PieceComposer, RequestWindow, Verification, verify};
use crate::torrent::TorrentInfo;

#[derive(Debug)]
pub struct DownloadResult {
    /// Verified file content, pieces in index order.
    pub content: Vec<u8>,
    pub elapsed: Duration,
    /// Peer the file was downloaded from.
    pub peer: SocketAddr,
}

/// Downloads a torrent's content from the first candidate peer that can serve all of it.
pub struct DownloadSession {
    torrent: Arc<TorrentInfo>,
    config: Config,
    notifications: Option<Sender<Notification>>,
    cancellation: CancellationToken,
}

impl DownloadSession {
    pub fn new(torrent: TorrentInfo, config: Config) -> Self {
        Self {
            torrent: Arc::new(torrent),
            config,
            notifications: None,
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_notifications(mut self, notifications: Sender<Notification>) -> Self {
        self.notifications = Some(notifications);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    pub fn torrent(&self) -> &TorrentInfo {
        &self.torrent
    }

    /// Selects a peer among `addrs` and downloads the whole file from it.
    pub async fn download(&self, addrs: &[SocketAddr]) -> Result<DownloadResult> {
        let start = Instant::now();
        let result = self.select_and_download(addrs, start).await;
        match &result {
            Ok(done) => {
                info!(
                    "downloaded {} bytes from {} in {:?}",
                    done.content.len(),
                    done.peer,
                    done.elapsed
                );
                self.send_notification(Notification::Completed {
                    length: done.content.len(),
                    elapsed: done.elapsed,
                });
            }
            Err(err) => {
                error!("download failed: {}", err);
                self.send_notification(Notification::Failed {
                    kind: err.kind(),
                    reason: err.to_string(),
                });
            }
        }
        result
    }

    async fn select_and_download(
        &self,
        addrs: &[SocketAddr],
        start: Instant,
    ) -> Result<DownloadResult> {
        let mut connection = self.select_peer(addrs).await?;
        let content = self.download_from(&mut connection).await?;
        Ok(DownloadResult {
            content,
            elapsed: start.elapsed(),
            peer: connection.addr(),
        })
    }

    /// Tries candidates until one passes every admission gate. Any failure other than
    /// cancellation only rejects the candidate at hand.
    pub async fn select_peer(
        &self,
        addrs: &[SocketAddr],
    ) -> Result<PeerConnection<PeerChannel<TcpStream>>> {
        let handshake = Handshake::new(self.torrent.info_hash, self.config.client_id);
        let total = addrs.len();
        let mut candidates = connector::candidates(
            addrs.to_vec(),
            self.config.connect_strategy,
            self.config.connect_timeout,
        );
        let mut rejections = Vec::with_capacity(total);

        while let Some(candidate) = self.cancellable(candidates.next()).await? {
            let Candidate {
                index,
                addr,
                socket,
            } = candidate;
            self.send_notification(Notification::Probing {
                address: addr,
                index,
                total,
            });

            let admitted = match socket {
                Ok(socket) => self
                    .cancellable(self.establish_and_admit(addr, socket, &handshake))
                    .await
                    .and_then(|admitted| admitted),
                Err(err) => Err(err),
            };
            match admitted {
                Ok(connection) => {
                    info!("[{}] selected", addr);
                    self.send_notification(Notification::PeerSelected { address: addr });
                    return Ok(connection);
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(error) => {
                    warn!("[{}] rejected: {}", addr, error);
                    self.send_notification(Notification::PeerRejected {
                        address: addr,
                        reason: error.to_string(),
                    });
                    rejections.push(Rejection { addr, error });
                }
            }
        }
        Err(Error::NoEligiblePeer(rejections))
    }

    async fn establish_and_admit(
        &self,
        addr: SocketAddr,
        socket: TcpStream,
        handshake: &Handshake,
    ) -> Result<PeerConnection<PeerChannel<TcpStream>>> {
        let piece_count = self.torrent.piece_count();
        let mut connection =
            PeerConnection::establish(addr, socket, handshake, &self.config, piece_count).await?;
        self.admit(&mut connection).await?;
        Ok(connection)
    }

    /// Runs the admission gates on a connected peer: it must announce every piece and unchoke
    /// us once we declare interest.
    pub async fn admit<C: Channel>(&self, connection: &mut PeerConnection<C>) -> Result<()> {
        connection.await_descriptor().await?;
        connection.ensure_complete()?;
        connection.send_interested().await?;
        connection.await_unchoke().await
    }

    /// Downloads every piece from an admitted peer. On cancellation the peer is told we are no
    /// longer interested.
    pub async fn download_from<C: Channel>(
        &self,
        connection: &mut PeerConnection<C>,
    ) -> Result<Vec<u8>> {
        let outcome = self.cancellable(self.transfer(connection)).await;
        match outcome {
            Ok(result) => result,
            Err(err) => {
                self.farewell(connection).await;
                Err(err)
            }
        }
    }

    async fn transfer<C: Channel>(&self, connection: &mut PeerConnection<C>) -> Result<Vec<u8>> {
        let torrent = &self.torrent;
        let pieces = torrent.piece_count();
        let blocks = Blocks::new(torrent, self.config.block_length());
        let mut window = RequestWindow::new(blocks, self.config.request_queue_depth);
        let mut composer = PieceComposer::new(Arc::clone(torrent));
        let mut content = vec![0; torrent.total_length];
        let mut verified = 0;
        let mut downloaded = 0;

        if !connection.is_choked() {
            request_all(connection, window.fill()).await?;
        }

        while verified < pieces {
            match connection.receive_next().await? {
                Incoming::Block(block) => {
                    match window.on_block_arrived(&Block::from(&block))? {
                        Arrival::Stale => {
                            debug!(
                                "[{}] ignoring voided block {:?}",
                                connection.addr(),
                                block
                            );
                            continue;
                        }
                        Arrival::Accepted { backfill } => {
                            if let Some(next) = backfill {
                                connection.request(next).await?;
                            }
                        }
                    }

                    let Some(piece) = composer.append(block)? else {
                        continue;
                    };
                    let index = piece.info.index;
                    if verify(index, &piece.data, &piece.info.hash) == Verification::Mismatch {
                        return Err(Error::HashMismatch { piece: index });
                    }
                    let offset = torrent.piece_offset(index);
                    content[offset..offset + piece.data.len()].copy_from_slice(&piece.data);
                    verified += 1;
                    downloaded += piece.data.len();
                    debug!("[{}] piece {} verified", connection.addr(), index);
                    self.send_notification(Notification::PieceVerified {
                        piece: index,
                        downloaded,
                        total: torrent.total_length,
                    });
                }
                Incoming::Choked => {
                    let voided = window.on_connection_choked();
                    info!(
                        "[{}] choked, voided {} requests",
                        connection.addr(),
                        voided
                    );
                }
                Incoming::Unchoked => {
                    request_all(connection, window.fill()).await?;
                }
                Incoming::Have(_) | Incoming::Consumed => {}
            }
        }
        Ok(content)
    }

    async fn farewell<C: Channel>(&self, connection: &mut PeerConnection<C>) {
        info!("[{}] cancelled, closing connection", connection.addr());
        if !connection.peer_state().is_interested() {
            return;
        }
        match timeout(
            self.config.shutdown_timeout,
            connection.send_not_interested(),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!("[{}] failed to say goodbye: {}", connection.addr(), err),
            Err(_) => debug!("[{}] timed out saying goodbye", connection.addr()),
        }
    }

    async fn cancellable<F: Future>(&self, future: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Error::Cancelled),
            output = future => Ok(output),
        }
    }

    fn send_notification(&self, notification: Notification) {
        if let Some(notifications) = &self.notifications {
            if let Err(err) = notifications.try_send(notification) {
                warn!("failed sending notification: {:?}", err);
            }
        }
    }
}

async fn request_all<C: Channel>(
    connection: &mut PeerConnection<C>,
    blocks: Vec<Block>,
) -> Result<()> {
    for block in blocks {
        connection.request(block).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bit_set::BitSet;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use crate::core::Sha1;
    use crate::error::ErrorKind;
    use crate::message::{BlockData, Message};
    use crate::peer::ConnectionState;
    use crate::peer::channel::fakes::{ScriptedChannel, Seeder, SeederChannel, spawn_tcp_peer};

    use super::*;

    const PIECE_LENGTH: usize = 32 * 1024;

    fn content() -> Vec<u8> {
        (0..42 * 1024).map(|i| (i % 251) as u8).collect()
    }

    fn torrent_for(content: &[u8]) -> TorrentInfo {
        let pieces = content.chunks(PIECE_LENGTH).map(Sha1::calculate).collect();
        TorrentInfo::new(Sha1([7; 20]), PIECE_LENGTH, content.len(), pieces).unwrap()
    }

    fn test_config() -> Config {
        Config::new()
            .with_connect_timeout(Duration::from_secs(1))
            .with_handshake_timeout(Duration::from_secs(1))
            .with_read_timeout(Duration::from_secs(2))
            .with_unchoke_timeout(Duration::from_millis(200))
    }

    fn seeded_connection(seeder: Seeder) -> PeerConnection<SeederChannel> {
        PeerConnection::new(
            "127.0.0.1:6881".parse().unwrap(),
            SeederChannel::new(seeder),
            2,
            Duration::from_millis(200),
        )
    }

    fn requests(sent: &[Message]) -> Vec<Block> {
        sent.iter()
            .filter_map(|message| match message {
                Message::Request(block) => Some(*block),
                _ => None,
            })
            .collect()
    }

    async fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<Notification>) -> Vec<Notification> {
        let mut notifications = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            notifications.push(notification);
        }
        notifications
    }

    #[tokio::test]
    async fn two_pieces_over_fake_channel() {
        let _ = env_logger::try_init();
        let content = content();
        let (tx, mut rx) = mpsc::channel(16);
        let session =
            DownloadSession::new(torrent_for(&content), test_config()).with_notifications(tx);
        let mut connection = seeded_connection(Seeder::new(content.clone(), PIECE_LENGTH));

        session.admit(&mut connection).await.unwrap();
        let downloaded = session.download_from(&mut connection).await.unwrap();

        assert_eq!(downloaded.len(), 42 * 1024);
        assert_eq!(downloaded, content);
        assert_eq!(connection.state(), ConnectionState::Unchoked);
        assert_eq!(connection.channel().sent[0], Message::Interested);
        assert_eq!(
            requests(&connection.channel().sent),
            vec![
                Block::new(0, 0, 16384),
                Block::new(0, 16384, 16384),
                Block::new(1, 0, 10240),
            ]
        );
        assert_eq!(
            drain(&mut rx),
            vec![
                Notification::PieceVerified {
                    piece: 0,
                    downloaded: 32 * 1024,
                    total: 42 * 1024
                },
                Notification::PieceVerified {
                    piece: 1,
                    downloaded: 42 * 1024,
                    total: 42 * 1024
                },
            ]
        );
    }

    #[tokio::test]
    async fn shallow_window_backfills() {
        let content = content();
        let config = test_config().with_request_queue_depth(1);
        let session = DownloadSession::new(torrent_for(&content), config);
        let mut connection = seeded_connection(Seeder::new(content.clone(), PIECE_LENGTH));

        session.admit(&mut connection).await.unwrap();
        let downloaded = session.download_from(&mut connection).await.unwrap();

        assert_eq!(downloaded, content);
        assert_eq!(requests(&connection.channel().sent).len(), 3);
    }

    #[tokio::test]
    async fn choke_voids_and_unchoke_resumes() {
        let content = content();
        let session = DownloadSession::new(torrent_for(&content), test_config());
        let seeder = Seeder::new(content.clone(), PIECE_LENGTH).choke_after(1);
        let mut connection = seeded_connection(seeder);

        session.admit(&mut connection).await.unwrap();
        let downloaded = session.download_from(&mut connection).await.unwrap();

        assert_eq!(downloaded, content);
        assert_eq!(
            requests(&connection.channel().sent),
            vec![
                Block::new(0, 0, 16384),
                Block::new(0, 16384, 16384),
                Block::new(1, 0, 10240),
                Block::new(0, 16384, 16384),
                Block::new(1, 0, 10240),
            ]
        );
    }

    #[tokio::test]
    async fn corrupted_piece_aborts() {
        let content = content();
        let session = DownloadSession::new(torrent_for(&content), test_config());
        let seeder = Seeder::new(content.clone(), PIECE_LENGTH).corrupt_piece(1);
        let mut connection = seeded_connection(seeder);

        session.admit(&mut connection).await.unwrap();
        let err = session.download_from(&mut connection).await.unwrap_err();

        assert!(matches!(err, Error::HashMismatch { piece: 1 }));
    }

    #[tokio::test]
    async fn out_of_order_block_aborts() {
        let content = content();
        let session = DownloadSession::new(torrent_for(&content), test_config());
        let mut connection = PeerConnection::new(
            "127.0.0.1:6881".parse().unwrap(),
            ScriptedChannel::new(vec![
                Message::Unchoke,
                Message::Piece(BlockData::new(0, 16384, vec![0; 16384])),
            ]),
            2,
            Duration::from_millis(200),
        );

        let err = session.download_from(&mut connection).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::OrderingViolation);
    }

    #[tokio::test]
    async fn bitfield_of_wrong_size_is_rejected() {
        let session = DownloadSession::new(torrent_for(&content()), test_config());
        let mut connection = PeerConnection::new(
            "127.0.0.1:6881".parse().unwrap(),
            ScriptedChannel::new(vec![Message::Bitfield(BitSet::from_bytes(&[0xff, 0xff]))]),
            2,
            Duration::from_millis(200),
        );

        let err = session.admit(&mut connection).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::BitfieldSizeMismatch);
    }

    #[tokio::test]
    async fn cancellation_says_not_interested() {
        let token = CancellationToken::new();
        let session = DownloadSession::new(torrent_for(&content()), test_config())
            .with_cancellation(token.clone());
        let mut connection = PeerConnection::new(
            "127.0.0.1:6881".parse().unwrap(),
            ScriptedChannel::new(vec![]).hanging(),
            2,
            Duration::from_millis(200),
        );
        connection.send_interested().await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        });

        let err = session.download_from(&mut connection).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(
            connection.channel().sent,
            vec![Message::Interested, Message::NotInterested]
        );
        assert!(!connection.peer_state().is_interested());
    }

    #[tokio::test]
    async fn cancellation_without_interest_stays_silent() {
        let session = DownloadSession::new(torrent_for(&content()), test_config());
        let mut connection = PeerConnection::new(
            "127.0.0.1:6881".parse().unwrap(),
            ScriptedChannel::new(vec![]).hanging(),
            2,
            Duration::from_millis(200),
        );
        session.cancellation_token().cancel();

        let err = session.download_from(&mut connection).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(connection.channel().sent.is_empty());
    }

    #[tokio::test]
    async fn downloads_from_tcp_peer() {
        let _ = env_logger::try_init();
        let content = content();
        let torrent = torrent_for(&content);
        let peer = spawn_tcp_peer(torrent.info_hash, Seeder::new(content.clone(), PIECE_LENGTH))
            .await;
        let session = DownloadSession::new(torrent, test_config());

        let result = session.download(&[peer]).await.unwrap();

        assert_eq!(result.content, content);
        assert_eq!(result.peer, peer);
    }

    #[tokio::test]
    async fn peer_missing_a_piece_is_skipped() {
        let _ = env_logger::try_init();
        let content = content();
        let torrent = torrent_for(&content);
        let partial = spawn_tcp_peer(
            torrent.info_hash,
            Seeder::new(content.clone(), PIECE_LENGTH).without_piece(1),
        )
        .await;
        let complete =
            spawn_tcp_peer(torrent.info_hash, Seeder::new(content.clone(), PIECE_LENGTH)).await;
        let (tx, mut rx) = mpsc::channel(16);
        let session = DownloadSession::new(torrent, test_config()).with_notifications(tx);

        let result = session.download(&[partial, complete]).await.unwrap();

        assert_eq!(result.content, content);
        assert_eq!(result.peer, complete);
        let notifications = drain(&mut rx);
        assert_eq!(
            notifications[0],
            Notification::Probing {
                address: partial,
                index: 0,
                total: 2
            }
        );
        assert!(matches!(
            &notifications[1],
            Notification::PeerRejected { address, .. } if *address == partial
        ));
        assert_eq!(
            notifications[3],
            Notification::PeerSelected { address: complete }
        );
        assert!(matches!(
            notifications.last(),
            Some(Notification::Completed { length, .. }) if *length == content.len()
        ));
    }

    #[tokio::test]
    async fn peer_that_never_unchokes_is_skipped() {
        let content = content();
        let torrent = torrent_for(&content);
        let stubborn = spawn_tcp_peer(
            torrent.info_hash,
            Seeder::new(content.clone(), PIECE_LENGTH).never_unchoke(),
        )
        .await;
        let complete =
            spawn_tcp_peer(torrent.info_hash, Seeder::new(content.clone(), PIECE_LENGTH)).await;
        let session = DownloadSession::new(torrent, test_config());

        let result = session.download(&[stubborn, complete]).await.unwrap();

        assert_eq!(result.peer, complete);
        assert_eq!(result.content, content);
    }

    #[tokio::test]
    async fn parallel_connect_finds_complete_peer() {
        let content = content();
        let torrent = torrent_for(&content);
        let partial = spawn_tcp_peer(
            torrent.info_hash,
            Seeder::new(content.clone(), PIECE_LENGTH).without_piece(0),
        )
        .await;
        let complete =
            spawn_tcp_peer(torrent.info_hash, Seeder::new(content.clone(), PIECE_LENGTH)).await;
        let config = test_config().with_connect_strategy(ConnectStrategy::Parallel);
        let (tx, mut rx) = mpsc::channel(16);
        let session = DownloadSession::new(torrent, config).with_notifications(tx);

        let result = session.download(&[partial, complete]).await.unwrap();

        assert_eq!(result.peer, complete);
        let tried: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|notification| match notification {
                Notification::Probing { address, index, .. } => Some((address, index)),
                _ => None,
            })
            .collect();
        assert!(tried.contains(&(complete, 1)));
        assert!(tried.iter().all(|entry| *entry == (partial, 0) || *entry == (complete, 1)));
    }

    #[tokio::test]
    async fn no_eligible_peer() {
        let content = content();
        let torrent = torrent_for(&content);
        let refused = closed_port().await;
        let partial = spawn_tcp_peer(
            torrent.info_hash,
            Seeder::new(content.clone(), PIECE_LENGTH).without_piece(1),
        )
        .await;
        let (tx, mut rx) = mpsc::channel(16);
        let session = DownloadSession::new(torrent, test_config()).with_notifications(tx);

        let err = session.download(&[refused, partial]).await.unwrap_err();

        let rejections = match err {
            Error::NoEligiblePeer(rejections) => rejections,
            other => panic!("unexpected error {}", other),
        };
        let outcome: Vec<_> = rejections
            .iter()
            .map(|rejection| (rejection.addr, rejection.error.kind()))
            .collect();
        assert_eq!(
            outcome,
            vec![
                (refused, ErrorKind::Connection),
                (partial, ErrorKind::IncompleteFile)
            ]
        );
        assert!(matches!(
            drain(&mut rx).last(),
            Some(Notification::Failed {
                kind: ErrorKind::NoEligiblePeer,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn cancelled_before_selection() {
        let content = content();
        let torrent = torrent_for(&content);
        let peer = spawn_tcp_peer(torrent.info_hash, Seeder::new(content, PIECE_LENGTH)).await;
        let session = DownloadSession::new(torrent, test_config());
        session.cancellation_token().cancel();

        let err = session.download(&[peer]).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
