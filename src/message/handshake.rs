use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{AsyncDecoder, AsyncEncoder, TransportMessage};
use crate::core::{PeerId, SHA1_LEN, Sha1};
use crate::error::{Error, Result};

pub const PROTOCOL: &[u8; 19] = b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 1 + PROTOCOL.len() + RESERVED_LEN + SHA1_LEN + PEER_ID_LEN;

const RESERVED_LEN: usize = 8;
const PEER_ID_LEN: usize = 20;

/// The handshake is a required message and must be the first message transmitted by the client.
///
/// _handshake: <pstrlen><pstr><reserved><info\_hash><peer\_id>_
///
/// * **pstrlen**: string length of <pstr>, as a single raw byte (19)
/// * **pstr**: "BitTorrent protocol"
/// * **reserved**: eight reserved bytes, all zero
/// * **info\_hash**: 20-byte SHA1 hash of the info key in the metainfo file
/// * **peer\_id**: 20-byte string used as a unique ID for the client
///
/// The initiator of a connection transmits its handshake immediately. A handshake carrying an
/// info hash other than the expected one means the connection must be dropped.
#[derive(Debug, PartialEq, Clone)]
pub struct Handshake {
    pub info_hash: Sha1,
    pub peer_id: PeerId,
}

impl Handshake {
    pub fn new(info_hash: Sha1, peer_id: PeerId) -> Self {
        Self { info_hash, peer_id }
    }

    pub fn to_bytes(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0; HANDSHAKE_LEN];
        let (pstrlen, rest) = buf.split_at_mut(1);
        let (pstr, rest) = rest.split_at_mut(PROTOCOL.len());
        let (_reserved, rest) = rest.split_at_mut(RESERVED_LEN);
        let (info_hash, peer_id) = rest.split_at_mut(SHA1_LEN);
        pstrlen[0] = PROTOCOL.len() as u8;
        pstr.copy_from_slice(PROTOCOL);
        info_hash.copy_from_slice(&self.info_hash.0);
        peer_id.copy_from_slice(&self.peer_id.0);
        buf
    }

    pub fn from_bytes(buf: &[u8; HANDSHAKE_LEN]) -> Result<Self> {
        let (pstrlen, rest) = buf.split_at(1);
        let (pstr, rest) = rest.split_at(PROTOCOL.len());
        let (_reserved, rest) = rest.split_at(RESERVED_LEN);
        let (info_hash, peer_id) = rest.split_at(SHA1_LEN);
        check_pstrlen(pstrlen[0])?;
        if pstr != PROTOCOL {
            return Err(Error::ProtocolMismatch(format!(
                "unsupported protocol {:?}",
                String::from_utf8_lossy(pstr)
            )));
        }

        let mut hash = [0; SHA1_LEN];
        hash.copy_from_slice(info_hash);
        let mut id = [0; PEER_ID_LEN];
        id.copy_from_slice(peer_id);
        Ok(Self::new(Sha1(hash), PeerId(id)))
    }

    /// Fails unless the remote handshake is for the same torrent.
    pub fn verify(&self, expected_info_hash: &Sha1) -> Result<()> {
        if &self.info_hash != expected_info_hash {
            return Err(Error::ProtocolMismatch(format!(
                "info hash mismatch: expected {}, got {}",
                expected_info_hash, self.info_hash
            )));
        }
        Ok(())
    }
}

fn check_pstrlen(pstrlen: u8) -> Result<()> {
    if pstrlen as usize != PROTOCOL.len() {
        return Err(Error::ProtocolMismatch(format!(
            "unexpected protocol string length {}",
            pstrlen
        )));
    }
    Ok(())
}

impl AsyncDecoder for Handshake {
    async fn decode<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Self> {
        let mut buf = [0; HANDSHAKE_LEN];
        buf[0] = stream.read_u8().await?;
        // Don't wait for the rest of a handshake we can't understand
        check_pstrlen(buf[0])?;
        stream.read_exact(&mut buf[1..]).await?;
        Self::from_bytes(&buf)
    }
}

impl AsyncEncoder for Handshake {
    async fn encode<S: AsyncWrite + Unpin>(&self, stream: &mut S) -> Result<()> {
        stream.write_all(&self.to_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }
}

impl TransportMessage for Handshake {
    fn transport_bytes(&self) -> usize {
        HANDSHAKE_LEN
    }
}
