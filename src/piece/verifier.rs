use log::warn;

use crate::core::Sha1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Match,
    Mismatch,
}

/// Compares the SHA-1 digest of a piece's bytes with the hash from the metainfo.
pub fn verify(piece: usize, data: &[u8], expected: &Sha1) -> Verification {
    let actual = Sha1::calculate(data);
    if &actual == expected {
        Verification::Match
    } else {
        warn!(
            "piece {} hash mismatch: expected {}, got {}",
            piece, expected, actual
        );
        Verification::Mismatch
    }
}
