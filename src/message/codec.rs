use bit_set::BitSet;
use log::debug;
use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::TransportMessage;
use crate::error::{Error, Result};
use crate::message::{Block, BlockData, Message};

const ID_CHOKE: u8 = 0;
const ID_UNCHOKE: u8 = 1;
const ID_INTERESTED: u8 = 2;
const ID_NOT_INTERESTED: u8 = 3;
const ID_HAVE: u8 = 4;
const ID_BITFIELD: u8 = 5;
const ID_REQUEST: u8 = 6;
const ID_PIECE: u8 = 7;
const ID_CANCEL: u8 = 8;
pub(crate) const LENGTH_SIZE: usize = 4;
const ID_SIZE: usize = 1;
const PIECE_HEADER_SIZE: usize = 8;

/// Length prefixed message framing.
///
/// Messages with an unknown id are consumed silently. Their payloads are discarded as they
/// arrive, so their length is never checked against `max_length`.
pub struct MessageCodec {
    max_length: usize,
    skipping: usize,
}

impl MessageCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            skipping: 0,
        }
    }

    fn discard(&mut self, src: &mut BytesMut) {
        let available = self.skipping.min(src.len());
        src.advance(available);
        self.skipping -= available;
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.transport_bytes());
        match item {
            Message::KeepAlive => dst.put_u32(0),
            Message::Choke => put_signal(ID_CHOKE, dst),
            Message::Unchoke => put_signal(ID_UNCHOKE, dst),
            Message::Interested => put_signal(ID_INTERESTED, dst),
            Message::NotInterested => put_signal(ID_NOT_INTERESTED, dst),
            Message::Have(piece) => {
                dst.put_u32(5);
                dst.put_u8(ID_HAVE);
                dst.put_u32(piece as u32);
            }
            Message::Bitfield(bitset) => {
                let bytes = bitset.get_ref().to_bytes();
                dst.put_u32((ID_SIZE + bytes.len()) as u32);
                dst.put_u8(ID_BITFIELD);
                dst.extend_from_slice(&bytes);
            }
            Message::Request(block) => put_block(ID_REQUEST, block, dst),
            Message::Piece(BlockData {
                piece,
                offset,
                data,
            }) => {
                dst.put_u32((ID_SIZE + PIECE_HEADER_SIZE + data.len()) as u32);
                dst.put_u8(ID_PIECE);
                dst.put_u32(piece as u32);
                dst.put_u32(offset as u32);
                dst.extend_from_slice(&data);
            }
            Message::Cancel(block) => put_block(ID_CANCEL, block, dst),
        }
        Ok(())
    }
}

fn put_signal(id: u8, dst: &mut BytesMut) {
    dst.put_u32(ID_SIZE as u32);
    dst.put_u8(id);
}

fn put_block(id: u8, block: Block, dst: &mut BytesMut) {
    dst.put_u32(13);
    dst.put_u8(id);
    dst.put_u32(block.piece as u32);
    dst.put_u32(block.offset as u32);
    dst.put_u32(block.length as u32);
}

impl Decoder for MessageCodec {
    type Error = Error;
    type Item = Message;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            self.discard(src);
            if self.skipping > 0 || src.len() < LENGTH_SIZE {
                return Ok(None);
            }

            let mut length_bytes = [0; LENGTH_SIZE];
            length_bytes.copy_from_slice(&src[0..LENGTH_SIZE]);
            let length = u32::from_be_bytes(length_bytes) as usize;

            if length == 0 {
                src.advance(LENGTH_SIZE);
                return Ok(Some(Message::KeepAlive));
            }

            if src.len() < LENGTH_SIZE + ID_SIZE {
                return Ok(None);
            }

            let id = src[LENGTH_SIZE];
            if id > ID_CANCEL {
                debug!("skipping unknown message id {} ({} bytes)", id, length);
                src.advance(LENGTH_SIZE + ID_SIZE);
                self.skipping = length - ID_SIZE;
                continue;
            }

            if length > self.max_length {
                return Err(Error::MalformedMessage(format!(
                    "message length {} exceeds maximum of {}",
                    length, self.max_length
                )));
            }

            if src.len() < LENGTH_SIZE + length {
                src.reserve(LENGTH_SIZE + length - src.len());
                return Ok(None);
            }

            src.advance(LENGTH_SIZE + ID_SIZE);
            let payload = src.split_to(length - ID_SIZE);
            return decode_payload(id, payload).map(Some);
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() && self.skipping == 0 => Ok(None),
            None => Err(Error::MalformedMessage(format!(
                "stream truncated mid-frame ({} bytes buffered)",
                buf.len()
            ))),
        }
    }
}

fn decode_payload(id: u8, mut payload: BytesMut) -> Result<Message> {
    let message = match (id, payload.len()) {
        (ID_CHOKE, 0) => Message::Choke,
        (ID_UNCHOKE, 0) => Message::Unchoke,
        (ID_INTERESTED, 0) => Message::Interested,
        (ID_NOT_INTERESTED, 0) => Message::NotInterested,
        (ID_HAVE, 4) => Message::Have(payload.get_u32() as usize),
        (ID_BITFIELD, _) => Message::Bitfield(BitSet::from_bytes(&payload)),
        (ID_REQUEST, 12) => Message::Request(decode_block(&mut payload)),
        (ID_PIECE, len) if len > PIECE_HEADER_SIZE => {
            let piece = payload.get_u32() as usize;
            let offset = payload.get_u32() as usize;
            Message::Piece(BlockData::new(piece, offset, payload.to_vec()))
        }
        (ID_CANCEL, 12) => Message::Cancel(decode_block(&mut payload)),
        (id, len) => {
            return Err(Error::MalformedMessage(format!(
                "invalid payload of {} bytes for message id {}",
                len, id
            )));
        }
    };
    Ok(message)
}

fn decode_block(src: &mut BytesMut) -> Block {
    let piece = src.get_u32() as usize;
    let offset = src.get_u32() as usize;
    let length = src.get_u32() as usize;
    Block::new(piece, offset, length)
}
