use crate::message::Block;
use crate::torrent::TorrentInfo;

/// Every block of a torrent in download order: piece 0 from offset 0, then piece 1, and so on.
/// Blocks are `block_size` long except the last block of each piece.
#[derive(Debug, Clone)]
pub struct Blocks {
    piece_size: usize,
    total_size: usize,
    block_size: usize,
    piece: usize,
    offset: usize,
    remaining: usize,
}

impl Blocks {
    pub fn new(torrent: &TorrentInfo, block_size: usize) -> Self {
        let piece_size = torrent.piece_length;
        let total_size = torrent.total_length;
        let block_size = block_size.max(1);
        let remaining = torrent
            .iter_pieces()
            .map(|piece| piece.length.div_ceil(block_size))
            .sum();
        Self {
            piece_size,
            total_size,
            block_size,
            piece: 0,
            offset: 0,
            remaining,
        }
    }

    fn current_piece_end(&self) -> usize {
        let piece_start = self.piece_size * self.piece;
        (piece_start + self.piece_size).min(self.total_size) - piece_start
    }
}

impl Iterator for Blocks {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let end = self.current_piece_end();
        let block_size = self.block_size.min(end - self.offset);
        let block = Block::new(self.piece, self.offset, block_size);
        self.offset += block_size;
        if self.offset == end {
            self.piece += 1;
            self.offset = 0;
        }
        self.remaining -= 1;
        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Blocks {}
