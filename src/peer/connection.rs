use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};

use crate::codec::{AsyncDecoder, AsyncEncoder};
use crate::core::PeerId;
use crate::error::{Error, Result};
use crate::message::{Block, BlockData, Handshake, Message};
use crate::peer::channel::{Channel, PeerChannel};
use crate::peer::connector::dial;
use crate::peer::state::{ConnectionState, Incoming, PeerState};
use crate::session::Config;

/// An established connection to a single peer, tracking its choke and availability state.
pub struct PeerConnection<C> {
    addr: SocketAddr,
    remote_id: Option<PeerId>,
    channel: C,
    state: PeerState,
    unchoke_timeout: Duration,
}

impl PeerConnection<PeerChannel<TcpStream>> {
    /// Connects to `addr` and exchanges handshakes.
    pub async fn connect(
        addr: SocketAddr,
        handshake: &Handshake,
        config: &Config,
        piece_count: usize,
    ) -> Result<Self> {
        let socket = dial(addr, config.connect_timeout).await?;
        Self::establish(addr, socket, handshake, config, piece_count).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerConnection<PeerChannel<S>> {
    /// Exchanges handshakes over an already connected stream.
    pub async fn establish(
        addr: SocketAddr,
        mut socket: S,
        handshake: &Handshake,
        config: &Config,
        piece_count: usize,
    ) -> Result<Self> {
        let mut state = PeerState::new(addr, piece_count);
        state.transport_established();

        let remote = timeout(
            config.handshake_timeout,
            exchange_handshakes(&mut socket, handshake),
        )
        .await
        .map_err(|_| Error::timed_out("handshake", config.handshake_timeout))??;
        state.handshake_completed();
        info!("[{}] handshake complete with {:?}", addr, remote.peer_id);

        let channel = PeerChannel::new(
            addr,
            socket,
            config.frame_limit(piece_count),
            config.read_timeout,
        );
        Ok(Self {
            addr,
            remote_id: Some(remote.peer_id),
            channel,
            state,
            unchoke_timeout: config.unchoke_timeout,
        })
    }
}

async fn exchange_handshakes<S: AsyncRead + AsyncWrite + Unpin>(
    socket: &mut S,
    handshake: &Handshake,
) -> Result<Handshake> {
    // The initiator sends first
    handshake.encode(socket).await?;
    let remote = Handshake::decode(socket).await?;
    remote.verify(&handshake.info_hash)?;
    Ok(remote)
}

impl<C: Channel> PeerConnection<C> {
    /// Wraps a channel whose handshake already took place.
    pub fn new(addr: SocketAddr, channel: C, piece_count: usize, unchoke_timeout: Duration) -> Self {
        let mut state = PeerState::new(addr, piece_count);
        state.transport_established();
        state.handshake_completed();
        Self {
            addr,
            remote_id: None,
            channel,
            state,
            unchoke_timeout,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn remote_id(&self) -> Option<&PeerId> {
        self.remote_id.as_ref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    pub fn peer_state(&self) -> &PeerState {
        &self.state
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn is_choked(&self) -> bool {
        self.state.is_choking()
    }

    /// Reads the next message and applies it to the peer state.
    pub async fn receive_next(&mut self) -> Result<Incoming> {
        let result = match self.channel.receive().await {
            Ok(message) => self.state.apply(message),
            Err(err) => Err(err),
        };
        match &result {
            Err(Error::ConnectionClosed) => {
                info!("[{}] connection closed by peer", self.addr);
                self.state.close();
            }
            Err(err) => {
                warn!("[{}] connection failed: {}", self.addr, err);
                self.state.fail();
            }
            Ok(Incoming::Choked) => debug!("[{}] choked", self.addr),
            Ok(Incoming::Unchoked) => debug!("[{}] unchoked", self.addr),
            Ok(_) => {}
        }
        result
    }

    pub async fn send_interested(&mut self) -> Result<()> {
        self.send(Message::Interested).await?;
        self.state.interested(Instant::now() + self.unchoke_timeout);
        Ok(())
    }

    pub async fn send_not_interested(&mut self) -> Result<()> {
        self.send(Message::NotInterested).await?;
        self.state.not_interested();
        Ok(())
    }

    pub async fn request(&mut self, block: Block) -> Result<()> {
        self.send(Message::Request(block)).await
    }

    /// Reads until the peer announced which pieces it has.
    pub async fn await_descriptor(&mut self) -> Result<()> {
        while !self.state.descriptor_received() {
            if let Incoming::Block(block) = self.receive_next().await? {
                return Err(self.unexpected("bitfield", &block));
            }
        }
        Ok(())
    }

    /// Fails unless the peer has every piece.
    pub fn ensure_complete(&self) -> Result<()> {
        self.state.ensure_complete()
    }

    /// Reads until the peer unchokes us, up to the deadline armed by
    /// [`send_interested`](Self::send_interested).
    pub async fn await_unchoke(&mut self) -> Result<()> {
        let deadline = self
            .state
            .unchoke_deadline()
            .unwrap_or_else(|| Instant::now() + self.unchoke_timeout);
        while self.state.is_choking() {
            match timeout_at(deadline, self.receive_next()).await {
                Ok(Ok(Incoming::Block(block))) => {
                    return Err(self.unexpected("unchoke", &block));
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    self.state.fail();
                    return Err(Error::UnchokeTimeout(self.unchoke_timeout));
                }
            }
        }
        Ok(())
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        debug!("[{}] > {:?}", self.addr, message);
        let result = self.channel.send(message).await;
        if let Err(err) = &result {
            warn!("[{}] failed to send: {}", self.addr, err);
            self.state.fail();
        }
        result
    }

    fn unexpected(&mut self, expected: &'static str, block: &BlockData) -> Error {
        self.state.fail();
        Error::UnexpectedMessage {
            expected,
            received: format!("piece {:?}", Block::from(block)),
        }
    }
}
