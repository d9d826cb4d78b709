use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ErrorKind;

/// Progress reported by a [`DownloadSession`](crate::session::DownloadSession).
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The candidate at position `index` (zero-based) of the `total` addresses is being tried.
    Probing {
        address: SocketAddr,
        index: usize,
        total: usize,
    },
    /// A candidate failed one of the admission gates.
    PeerRejected { address: SocketAddr, reason: String },
    /// A candidate passed every gate and will serve the file.
    PeerSelected { address: SocketAddr },
    /// A piece was verified and copied to the output buffer. `downloaded` counts the bytes of
    /// every piece verified so far, out of `total` bytes in the file.
    PieceVerified {
        piece: usize,
        downloaded: usize,
        total: usize,
    },
    Completed { length: usize, elapsed: Duration },
    Failed { kind: ErrorKind, reason: String },
}
