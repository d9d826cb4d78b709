use std::fmt::{Debug, Display, Formatter};

use sha1::Digest;

use crate::error::{Error, Result};

pub const SHA1_LEN: usize = 20;

/// A 20-byte SHA-1 digest, used both for the torrent's info hash and for piece hashes.
#[derive(PartialEq, Eq, Clone, Copy, Hash)]
pub struct Sha1(pub [u8; SHA1_LEN]);

impl Sha1 {
    pub fn calculate(data: &[u8]) -> Self {
        Self(sha1::Sha1::digest(data).into())
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let mut bytes = [0; SHA1_LEN];
        hex::decode_to_slice(hex_str, &mut bytes).map_err(|err| {
            Error::InvalidMetadata(format!("invalid sha1 {:?}: {}", hex_str, err))
        })?;
        Ok(Self(bytes))
    }

    /// Splits the concatenated `pieces` string of a metainfo file into individual hashes.
    pub fn split_concatenated(bytes: &[u8]) -> Result<Vec<Self>> {
        if bytes.len() % SHA1_LEN != 0 {
            return Err(Error::InvalidMetadata(format!(
                "invalid length {}. must be a multiple of {}",
                bytes.len(),
                SHA1_LEN
            )));
        }
        let hashes = bytes
            .chunks_exact(SHA1_LEN)
            .map(|chunk| {
                let mut hash = [0; SHA1_LEN];
                hash.copy_from_slice(chunk);
                Self(hash)
            })
            .collect();
        Ok(hashes)
    }
}

impl Display for Sha1 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl Debug for Sha1 {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sha1({})", self)
    }
}
