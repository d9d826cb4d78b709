//! Download side of the BitTorrent peer wire protocol: pipelined block requests to a single
//! peer, in-order piece assembly and SHA-1 verification.

pub mod codec;
pub mod core;
pub mod error;
pub mod message;
pub mod peer;
pub mod piece;
pub mod session;
pub mod torrent;

pub use crate::core::{PeerId, Sha1};
pub use error::{Error, ErrorKind, Rejection, Result, Violation};
pub use session::{Config, ConnectStrategy, DownloadResult, DownloadSession, Notification};
pub use torrent::{PieceInfo, TorrentInfo};
