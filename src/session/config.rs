use std::time::Duration;

use size::Size;

use crate::core::PeerId;

/// How candidate peers are dialed during peer selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectStrategy {
    /// Dial one candidate at a time, in the given order.
    #[default]
    Sequential,
    /// Dial every candidate at once and admit them in the order their connections complete.
    Parallel,
}

/// Configuration settings for a download session
#[derive(Clone, Debug)]
pub struct Config {
    // Identity
    /// Unique identifier sent in our handshake
    pub client_id: PeerId,

    // Transfer Settings
    /// Size of data blocks requested from the peer
    pub block_size: Size,
    /// Number of block requests kept in flight
    pub request_queue_depth: usize,
    /// Largest message frame accepted from the peer, in bytes after the length prefix
    pub max_message_length: usize,

    // Timeouts
    /// Timeout for establishing the TCP connection
    pub connect_timeout: Duration,
    /// Timeout for the peer's handshake to arrive
    pub handshake_timeout: Duration,
    /// Time given to the peer to unchoke us after we declared interest
    pub unchoke_timeout: Duration,
    /// Timeout for each message read once connected
    pub read_timeout: Duration,
    /// Time allowed for the farewell `not interested` when cancelled
    pub shutdown_timeout: Duration,

    // Peer Selection
    /// How candidate peers are dialed
    pub connect_strategy: ConnectStrategy,
}

impl Config {
    pub fn with_client_id(mut self, client_id: PeerId) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_block_size(mut self, size: Size) -> Self {
        self.block_size = size;
        self
    }

    pub fn with_request_queue_depth(mut self, depth: usize) -> Self {
        self.request_queue_depth = depth;
        self
    }

    pub fn with_max_message_length(mut self, length: usize) -> Self {
        self.max_message_length = length;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_unchoke_timeout(mut self, timeout: Duration) -> Self {
        self.unchoke_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_connect_strategy(mut self, strategy: ConnectStrategy) -> Self {
        self.connect_strategy = strategy;
        self
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            client_id: PeerId::random(),
            block_size: Size::from_kibibytes(16),
            request_queue_depth: 150,
            max_message_length: Size::from_kibibytes(256).bytes() as usize,
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(10),
            unchoke_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(1),
            connect_strategy: ConnectStrategy::Sequential,
        }
    }

    pub fn block_length(&self) -> usize {
        self.block_size.bytes() as usize
    }

    /// The configured frame limit, raised when needed so a full block or a complete bitfield
    /// still fits in one frame.
    pub fn frame_limit(&self, piece_count: usize) -> usize {
        // id, piece index and offset precede the block
        let piece_frame = 1 + 8 + self.block_length();
        let bitfield_frame = 1 + piece_count.div_ceil(8);
        self.max_message_length.max(piece_frame).max(bitfield_frame)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
