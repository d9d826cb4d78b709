use std::fmt::{Debug, Formatter};

/// Identifies a range of bytes within a piece, as carried by `request` and `cancel` messages.
#[derive(Debug, PartialEq, Clone, Copy, Eq, Hash)]
pub struct Block {
    pub piece: usize,
    pub offset: usize,
    pub length: usize,
}

impl Block {
    pub fn new(piece: usize, offset: usize, length: usize) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }
}

/// Block payload received in a `piece` message.
#[derive(PartialEq, Eq, Clone)]
pub struct BlockData {
    pub piece: usize,
    pub offset: usize,
    pub data: Vec<u8>,
}

impl BlockData {
    pub fn new(piece: usize, offset: usize, data: Vec<u8>) -> Self {
        Self {
            piece,
            offset,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl From<&BlockData> for Block {
    fn from(value: &BlockData) -> Self {
        Self::new(value.piece, value.offset, value.data.len())
    }
}

impl Debug for BlockData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BlockData {{ piece: {}, offset: {}, data: <{} bytes> }}",
            self.piece,
            self.offset,
            self.data.len()
        )
    }
}
