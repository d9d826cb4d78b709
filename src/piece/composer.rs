use std::sync::Arc;

use log::trace;

use crate::error::{Error, Result, Violation};
use crate::message::BlockData;
use crate::torrent::{PieceInfo, TorrentInfo};

/// A fully assembled, not yet verified piece.
#[derive(Debug, PartialEq)]
pub struct Piece {
    pub info: PieceInfo,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct PieceBuffer {
    info: PieceInfo,
    data: Vec<u8>,
    cursor: usize,
}

/// Reassembles pieces from blocks arriving in ascending, contiguous order.
#[derive(Debug)]
pub struct PieceComposer {
    torrent: Arc<TorrentInfo>,
    next_piece: usize,
    current: Option<PieceBuffer>,
}

impl PieceComposer {
    pub fn new(torrent: Arc<TorrentInfo>) -> Self {
        Self {
            torrent,
            next_piece: 0,
            current: None,
        }
    }

    /// Appends a block, returning the piece once its last byte arrived.
    pub fn append(&mut self, block: BlockData) -> Result<Option<Piece>> {
        if block.piece != self.next_piece {
            return Err(Error::OrderingViolation(Violation::PieceIndex {
                expected: self.next_piece,
                actual: block.piece,
            }));
        }

        let buffer = match self.current.take() {
            Some(buffer) => buffer,
            None => self.start_piece(block.piece)?,
        };
        if !self.current.insert(buffer).write(block)? {
            return Ok(None);
        }

        self.next_piece += 1;
        Ok(self.current.take().map(|buffer| {
            trace!("piece {} assembled", buffer.info.index);
            Piece {
                info: buffer.info,
                data: buffer.data,
            }
        }))
    }

    fn start_piece(&self, index: usize) -> Result<PieceBuffer> {
        let info = self.torrent.piece(index).ok_or_else(|| {
            Error::OrderingViolation(Violation::PieceIndex {
                expected: self.torrent.piece_count(),
                actual: index,
            })
        })?;
        Ok(PieceBuffer {
            info,
            data: vec![0; info.length],
            cursor: 0,
        })
    }
}

impl PieceBuffer {
    /// Copies the block at the cursor. Returns whether the piece is now complete.
    fn write(&mut self, block: BlockData) -> Result<bool> {
        let piece = self.info.index;
        if block.offset != self.cursor {
            return Err(Error::OrderingViolation(Violation::Offset {
                piece,
                expected: self.cursor,
                actual: block.offset,
            }));
        }
        let end = block.offset + block.len();
        if end > self.info.length {
            return Err(Error::OrderingViolation(Violation::Overrun {
                piece,
                end,
                length: self.info.length,
            }));
        }
        self.data[block.offset..end].copy_from_slice(&block.data);
        self.cursor = end;
        Ok(self.cursor == self.info.length)
    }
}

#[cfg(test)]
mod tests {
    use crate::core::Sha1;

    use super::*;

    fn composer(piece_length: usize, total_length: usize) -> PieceComposer {
        let pieces = total_length.div_ceil(piece_length);
        let torrent = TorrentInfo::new(
            Sha1([0; 20]),
            piece_length,
            total_length,
            vec![Sha1([0; 20]); pieces],
        )
        .unwrap();
        PieceComposer::new(Arc::new(torrent))
    }

    #[test]
    fn contiguous_blocks_complete_each_piece_once() {
        let mut composer = composer(8, 20);

        assert_eq!(composer.append(BlockData::new(0, 0, vec![1; 4])).unwrap(), None);
        let piece = composer
            .append(BlockData::new(0, 4, vec![2; 4]))
            .unwrap()
            .unwrap();
        assert_eq!(piece.info.index, 0);
        assert_eq!(piece.data, vec![1, 1, 1, 1, 2, 2, 2, 2]);

        let middle = composer.append(BlockData::new(1, 0, vec![3; 8])).unwrap();
        assert_eq!(middle.map(|piece| piece.data.len()), Some(8));

        let last = composer
            .append(BlockData::new(2, 0, vec![4; 4]))
            .unwrap()
            .unwrap();
        assert_eq!(last.info.length, 4);
        assert_eq!(last.data, vec![4; 4]);
    }

    #[test]
    fn gap_is_rejected() {
        let mut composer = composer(16, 16);
        composer.append(BlockData::new(0, 0, vec![0; 4])).unwrap();

        let err = composer
            .append(BlockData::new(0, 5, vec![0; 4]))
            .unwrap_err();

        assert!(matches!(
            err,
            Error::OrderingViolation(Violation::Offset {
                piece: 0,
                expected: 4,
                actual: 5
            })
        ));
    }

    #[test]
    fn overlap_is_rejected() {
        let mut composer = composer(16, 16);
        composer.append(BlockData::new(0, 0, vec![0; 4])).unwrap();

        let err = composer
            .append(BlockData::new(0, 3, vec![0; 4]))
            .unwrap_err();

        assert!(matches!(
            err,
            Error::OrderingViolation(Violation::Offset { expected: 4, actual: 3, .. })
        ));
    }

    #[test]
    fn unexpected_offset_in_first_block() {
        let mut composer = composer(16, 16);

        let err = composer
            .append(BlockData::new(0, 4, vec![0; 4]))
            .unwrap_err();

        assert!(matches!(
            err,
            Error::OrderingViolation(Violation::Offset { expected: 0, actual: 4, .. })
        ));
    }

    #[test]
    fn pieces_must_ascend() {
        let mut composer = composer(4, 12);

        let err = composer
            .append(BlockData::new(1, 0, vec![0; 4]))
            .unwrap_err();

        assert!(matches!(
            err,
            Error::OrderingViolation(Violation::PieceIndex {
                expected: 0,
                actual: 1
            })
        ));
    }

    #[test]
    fn block_running_past_piece_end() {
        let mut composer = composer(8, 8);

        let err = composer
            .append(BlockData::new(0, 0, vec![0; 12]))
            .unwrap_err();

        assert!(matches!(
            err,
            Error::OrderingViolation(Violation::Overrun {
                piece: 0,
                end: 12,
                length: 8
            })
        ));
    }

    #[test]
    fn piece_past_last_index() {
        let mut composer = composer(4, 4);
        composer.append(BlockData::new(0, 0, vec![0; 4])).unwrap();

        let err = composer
            .append(BlockData::new(1, 0, vec![0; 4]))
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::ErrorKind::OrderingViolation);
    }
}
