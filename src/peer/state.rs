use std::net::SocketAddr;

use bit_set::BitSet;
use log::{debug, warn};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::message::{BlockData, Message};

/// Observable stage of a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Handshaking,
    /// Waiting for the peer's `bitfield` or first `have`.
    AwaitingDescriptor,
    /// We have not declared interest yet.
    NotInterested,
    /// Interested, waiting for the peer to unchoke us.
    Choked,
    /// Interested and allowed to request blocks.
    Unchoked,
    Closed,
    Failed,
}

/// What a received message means to the download loop.
#[derive(Debug, PartialEq)]
pub enum Incoming {
    /// Fully handled by the connection.
    Consumed,
    /// The peer choked us. Outstanding requests will not be answered.
    Choked,
    Unchoked,
    Have(usize),
    Block(BlockData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Closed,
    Failed,
}

/// Choke, interest and availability bookkeeping for one peer.
#[derive(Debug)]
pub struct PeerState {
    addr: SocketAddr,
    piece_count: usize,
    transport_established: bool,
    handshake_complete: bool,
    descriptor_received: bool,
    pieces: BitSet,
    am_interested: bool,
    peer_choking: bool,
    unchoke_deadline: Option<Instant>,
    status: Status,
}

impl PeerState {
    pub fn new(addr: SocketAddr, piece_count: usize) -> Self {
        Self {
            addr,
            piece_count,
            transport_established: false,
            handshake_complete: false,
            descriptor_received: false,
            pieces: BitSet::with_capacity(piece_count),
            am_interested: false,
            peer_choking: true,
            unchoke_deadline: None,
            status: Status::Open,
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self.status {
            Status::Failed => ConnectionState::Failed,
            Status::Closed => ConnectionState::Closed,
            Status::Open if !self.transport_established => ConnectionState::Connecting,
            Status::Open if !self.handshake_complete => ConnectionState::Handshaking,
            Status::Open if !self.descriptor_received => ConnectionState::AwaitingDescriptor,
            Status::Open if !self.am_interested => ConnectionState::NotInterested,
            Status::Open if self.peer_choking => ConnectionState::Choked,
            Status::Open => ConnectionState::Unchoked,
        }
    }

    pub fn transport_established(&mut self) {
        self.transport_established = true;
    }

    pub fn handshake_completed(&mut self) {
        self.handshake_complete = true;
    }

    /// Records that we sent `interested`; the peer has until `deadline` to unchoke us.
    pub fn interested(&mut self, deadline: Instant) {
        self.am_interested = true;
        if self.peer_choking {
            self.unchoke_deadline = Some(deadline);
        }
    }

    pub fn not_interested(&mut self) {
        self.am_interested = false;
        self.unchoke_deadline = None;
    }

    pub fn close(&mut self) {
        if self.status == Status::Open {
            self.status = Status::Closed;
        }
    }

    pub fn fail(&mut self) {
        self.status = Status::Failed;
    }

    pub fn is_choking(&self) -> bool {
        self.peer_choking
    }

    pub fn is_interested(&self) -> bool {
        self.am_interested
    }

    pub fn descriptor_received(&self) -> bool {
        self.descriptor_received
    }

    pub fn unchoke_deadline(&self) -> Option<Instant> {
        self.unchoke_deadline
    }

    pub fn has_piece(&self, piece: usize) -> bool {
        self.pieces.contains(piece)
    }

    pub fn missing_pieces(&self) -> usize {
        self.piece_count - self.pieces.len()
    }

    /// Fails unless the peer announced every piece of the torrent.
    pub fn ensure_complete(&self) -> Result<()> {
        match self.missing_pieces() {
            0 => Ok(()),
            missing => Err(Error::IncompleteFile {
                missing,
                total: self.piece_count,
            }),
        }
    }

    /// Updates the state with a message received from the peer.
    pub fn apply(&mut self, message: Message) -> Result<Incoming> {
        match message {
            Message::Choke => {
                self.peer_choking = true;
                Ok(Incoming::Choked)
            }
            Message::Unchoke => {
                self.peer_choking = false;
                self.unchoke_deadline = None;
                Ok(Incoming::Unchoked)
            }
            Message::Have(piece) => {
                if piece >= self.piece_count {
                    return Err(Error::MalformedMessage(format!(
                        "have for piece {} out of {}",
                        piece, self.piece_count
                    )));
                }
                self.pieces.insert(piece);
                self.descriptor_received = true;
                Ok(Incoming::Have(piece))
            }
            Message::Bitfield(bitfield) => {
                self.apply_bitfield(bitfield)?;
                Ok(Incoming::Consumed)
            }
            Message::Piece(block) => Ok(Incoming::Block(block)),
            other => {
                debug!("[{}] ignoring {:?}", self.addr, other);
                Ok(Incoming::Consumed)
            }
        }
    }

    fn apply_bitfield(&mut self, bitfield: BitSet) -> Result<()> {
        if self.descriptor_received {
            warn!("[{}] ignoring bitfield after availability was announced", self.addr);
            return Ok(());
        }
        let expected = self.piece_count.div_ceil(8);
        let received = bitfield.get_ref().len().div_ceil(8);
        if expected != received {
            return Err(Error::BitfieldSizeMismatch { expected, received });
        }
        // Spare bits past the last piece are ignored
        let piece_count = self.piece_count;
        self.pieces = bitfield.iter().filter(|&piece| piece < piece_count).collect();
        self.descriptor_received = true;
        debug!(
            "[{}] peer has {} of {} pieces",
            self.addr,
            self.pieces.len(),
            self.piece_count
        );
        Ok(())
    }
}
