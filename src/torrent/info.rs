use crate::core::Sha1;
use crate::error::{Error, Result};

/// The parts of a torrent's metainfo needed to download and verify its content.
#[derive(Debug, PartialEq, Clone)]
pub struct TorrentInfo {
    pub info_hash: Sha1,
    pub piece_length: usize,
    pub total_length: usize,
    pub pieces: Vec<Sha1>,
}

impl TorrentInfo {
    pub fn new(
        info_hash: Sha1,
        piece_length: usize,
        total_length: usize,
        pieces: Vec<Sha1>,
    ) -> Result<Self> {
        if piece_length == 0 {
            return Err(Error::InvalidMetadata("piece length must be positive".into()));
        }
        let expected = total_length.div_ceil(piece_length);
        if pieces.len() != expected {
            return Err(Error::InvalidMetadata(format!(
                "{} bytes in pieces of {} need {} hashes, got {}",
                total_length,
                piece_length,
                expected,
                pieces.len()
            )));
        }
        Ok(Self {
            info_hash,
            piece_length,
            total_length,
            pieces,
        })
    }

    pub fn piece_count(&self) -> usize {
        self.pieces.len()
    }

    /// Length of a piece. Only the last piece may be shorter than `piece_length`.
    pub fn piece_size(&self, piece: usize) -> usize {
        let piece_start = self.piece_offset(piece);
        let piece_end = (piece_start + self.piece_length).min(self.total_length);
        piece_end.saturating_sub(piece_start)
    }

    /// Offset of a piece's first byte within the file.
    pub fn piece_offset(&self, piece: usize) -> usize {
        self.piece_length * piece
    }

    pub fn piece(&self, index: usize) -> Option<PieceInfo> {
        self.pieces.get(index).map(|hash| PieceInfo {
            index,
            length: self.piece_size(index),
            hash: *hash,
        })
    }

    pub fn iter_pieces(&self) -> impl Iterator<Item = PieceInfo> + '_ {
        (0..self.piece_count()).filter_map(|index| self.piece(index))
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct PieceInfo {
    pub index: usize,
    pub length: usize,
    pub hash: Sha1,
}
