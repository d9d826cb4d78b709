pub mod channel;
pub mod connection;
pub mod connector;
pub mod state;

pub use channel::{Channel, PeerChannel};
pub use connection::PeerConnection;
pub use state::{ConnectionState, Incoming, PeerState};
