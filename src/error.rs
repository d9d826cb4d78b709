use std::fmt::{Display, Formatter};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::message::Block;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while selecting a peer and transferring a file from it.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection refused, reset or timed out.
    #[error("connection error: {0}")]
    Connection(#[from] io::Error),

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The remote handshake does not match the protocol or the torrent.
    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    /// The peer's bitfield does not have one bit per piece.
    #[error("bitfield size mismatch: expected {expected} bytes, got {received}")]
    BitfieldSizeMismatch { expected: usize, received: usize },

    /// The peer does not hold every piece of the file.
    #[error("peer is missing {missing} of {total} pieces")]
    IncompleteFile { missing: usize, total: usize },

    /// The peer sent a message that makes no sense at this point of the exchange.
    #[error("unexpected {received} while waiting for {expected}")]
    UnexpectedMessage {
        expected: &'static str,
        received: String,
    },

    /// The peer did not unchoke us in time.
    #[error("peer did not unchoke within {0:?}")]
    UnchokeTimeout(Duration),

    /// A frame that could not be decoded.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// A block that does not fit the request pipeline or the piece being assembled.
    #[error("ordering violation: {0}")]
    OrderingViolation(Violation),

    /// A completed piece does not match its expected digest.
    #[error("piece {piece} does not match expected hash")]
    HashMismatch { piece: usize },

    /// Torrent metadata handed to the engine is inconsistent.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("download cancelled")]
    Cancelled,

    /// Every candidate peer was rejected.
    #[error("no eligible peer among {} candidates", .0.len())]
    NoEligiblePeer(Vec<Rejection>),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::ConnectionClosed => ErrorKind::ConnectionClosed,
            Self::ProtocolMismatch(_) => ErrorKind::ProtocolMismatch,
            Self::BitfieldSizeMismatch { .. } => ErrorKind::BitfieldSizeMismatch,
            Self::IncompleteFile { .. } => ErrorKind::IncompleteFile,
            Self::UnexpectedMessage { .. } => ErrorKind::UnexpectedMessage,
            Self::UnchokeTimeout(_) => ErrorKind::UnchokeTimeout,
            Self::MalformedMessage(_) => ErrorKind::MalformedMessage,
            Self::OrderingViolation(_) => ErrorKind::OrderingViolation,
            Self::HashMismatch { .. } => ErrorKind::HashMismatch,
            Self::InvalidMetadata(_) => ErrorKind::InvalidMetadata,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::NoEligiblePeer(_) => ErrorKind::NoEligiblePeer,
        }
    }

    pub(crate) fn timed_out(what: &str, after: Duration) -> Self {
        Self::Connection(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("{} timed out after {:?}", what, after),
        ))
    }
}

/// Payload-free discriminant of [`Error`], cheap to hand to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    ConnectionClosed,
    ProtocolMismatch,
    BitfieldSizeMismatch,
    IncompleteFile,
    UnexpectedMessage,
    UnchokeTimeout,
    MalformedMessage,
    OrderingViolation,
    HashMismatch,
    InvalidMetadata,
    Cancelled,
    NoEligiblePeer,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The block belongs to another piece than the one being assembled.
    PieceIndex { expected: usize, actual: usize },
    /// The block does not start at the piece's write cursor.
    Offset {
        piece: usize,
        expected: usize,
        actual: usize,
    },
    /// The block runs past the end of its piece.
    Overrun {
        piece: usize,
        end: usize,
        length: usize,
    },
    /// The block is not the oldest outstanding request.
    UnexpectedBlock { expected: Block, actual: Block },
    /// The block matches no outstanding request.
    Unsolicited(Block),
}

impl Display for Violation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PieceIndex { expected, actual } => write!(
                f,
                "unexpected piece index: expected {}, got {}",
                expected, actual
            ),
            Self::Offset {
                piece,
                expected,
                actual,
            } => write!(
                f,
                "unexpected block offset in piece {}: expected {}, got {}",
                piece, expected, actual
            ),
            Self::Overrun { piece, end, length } => write!(
                f,
                "block ending at {} overruns piece {} of length {}",
                end, piece, length
            ),
            Self::UnexpectedBlock { expected, actual } => {
                write!(f, "expected block {:?}, got {:?}", expected, actual)
            }
            Self::Unsolicited(block) => write!(f, "unsolicited block {:?}", block),
        }
    }
}

/// A candidate peer that failed one of the admission gates.
#[derive(Debug)]
pub struct Rejection {
    pub addr: SocketAddr,
    pub error: Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_are_connection_errors() {
        let err: Error = io::Error::from(io::ErrorKind::ConnectionRefused).into();

        assert_eq!(err.kind(), ErrorKind::Connection);
    }

    #[test]
    fn timeouts_keep_their_io_kind() {
        match Error::timed_out("handshake", Duration::from_secs(10)) {
            Error::Connection(err) => {
                assert_eq!(err.kind(), io::ErrorKind::TimedOut);
                assert_eq!(err.to_string(), "handshake timed out after 10s");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn describe_violations() {
        let err = Error::OrderingViolation(Violation::Offset {
            piece: 0,
            expected: 5,
            actual: 3,
        });

        assert_eq!(
            err.to_string(),
            "ordering violation: unexpected block offset in piece 0: expected 5, got 3"
        );
    }

    #[test]
    fn no_eligible_peer_counts_candidates() {
        let err = Error::NoEligiblePeer(vec![
            Rejection {
                addr: "127.0.0.1:1".parse().unwrap(),
                error: Error::ConnectionClosed,
            },
            Rejection {
                addr: "127.0.0.1:2".parse().unwrap(),
                error: Error::UnchokeTimeout(Duration::from_secs(1)),
            },
        ]);

        assert_eq!(err.to_string(), "no eligible peer among 2 candidates");
    }
}
