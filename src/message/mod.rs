mod block;
mod codec;
mod handshake;

use std::fmt::{Debug, Formatter};

use bit_set::BitSet;

pub use block::*;
pub use codec::*;
pub use handshake::*;

use crate::codec::TransportMessage;

/// Messages exchanged after the handshake take the form of <length prefix><message ID><payload>.
/// The length prefix is a four byte big-endian value counting the bytes that follow it. The
/// message ID is a single byte.
#[derive(PartialEq, Eq, Clone)]
pub enum Message {
    /// # keep-alive: <len=0000>
    ///
    /// A frame with no ID and no payload, sent to keep an idle connection open.
    KeepAlive,

    /// # choke: <len=0001><id=0>
    ///
    /// The peer will not answer requests until it sends **unchoke**. Outstanding requests are
    /// dropped by the peer.
    Choke,

    /// # unchoke: <len=0001><id=1>
    Unchoke,

    /// # interested: <len=0001><id=2>
    Interested,

    /// # not interested: <len=0001><id=3>
    NotInterested,

    /// # have: <len=0005><id=4><piece index>
    ///
    /// Zero-based index of a piece the sender has just downloaded and verified.
    Have(usize),

    /// # bitfield: <len=0001+X><id=5><bitfield>
    ///
    /// Sent right after the handshake. X is the length of the bitfield in bytes. The high bit
    /// in the first byte corresponds to piece index 0. Spare bits at the end are set to zero.
    Bitfield(BitSet),

    /// # request: <len=0013><id=6><index><begin><length>
    ///
    /// * **index**: zero-based piece index
    /// * **begin**: zero-based byte offset within the piece
    /// * **length**: requested length
    Request(Block),

    /// # piece: <len=0009+X><id=7><index><begin><block>
    ///
    /// X is the length of the block, which is a subset of the piece specified by index.
    Piece(BlockData),

    /// # cancel: <len=0013><id=8><index><begin><length>
    ///
    /// Payload is identical to that of **request**.
    Cancel(Block),
}

impl Debug for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "KeepAlive"),
            Message::Choke => write!(f, "Choke"),
            Message::Unchoke => write!(f, "Unchoke"),
            Message::Interested => write!(f, "Interested"),
            Message::NotInterested => write!(f, "NotInterested"),
            Message::Have(piece) => write!(f, "Have {{ piece: {} }}", piece),
            Message::Bitfield(bitset) => write!(f, "Bitfield(<{} pieces>)", bitset.len()),
            Message::Request(block) => write!(f, "Request({:?})", block),
            Message::Piece(block) => write!(f, "Piece({:?})", block),
            Message::Cancel(block) => write!(f, "Cancel({:?})", block),
        }
    }
}

impl TransportMessage for Message {
    fn transport_bytes(&self) -> usize {
        let payload_size = match self {
            Self::KeepAlive => 0,
            Self::Choke | Self::Unchoke | Self::Interested | Self::NotInterested => 1,
            Self::Have(_) => 5,
            Self::Bitfield(bitset) => 1 + bitset.get_ref().to_bytes().len(),
            Self::Request(_) | Self::Cancel(_) => 13,
            Self::Piece(block) => 9 + block.data.len(),
        };
        LENGTH_SIZE + payload_size
    }
}
