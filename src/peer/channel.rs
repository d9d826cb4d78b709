use std::net::SocketAddr;
use std::time::Duration;

use futures::SinkExt;
use log::trace;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_stream::StreamExt;
use tokio_util::codec::Framed;

use crate::error::{Error, Result};
use crate::message::{Message, MessageCodec};

/// Where peer messages come from and go to.
pub trait Channel {
    /// Writes one message to the peer.
    async fn send(&mut self, message: Message) -> Result<()>;

    /// Waits for the next message from the peer, other than a keep-alive. Fails with
    /// [`Error::ConnectionClosed`] once the peer closed the stream.
    async fn receive(&mut self) -> Result<Message>;
}

/// [`Channel`] over a length prefixed byte stream, typically a `TcpStream`.
pub struct PeerChannel<S> {
    addr: SocketAddr,
    messages: Framed<S, MessageCodec>,
    read_timeout: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerChannel<S> {
    pub fn new(addr: SocketAddr, stream: S, max_length: usize, read_timeout: Duration) -> Self {
        Self {
            addr,
            messages: Framed::new(stream, MessageCodec::new(max_length)),
            read_timeout,
        }
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Channel for PeerChannel<S> {
    async fn send(&mut self, message: Message) -> Result<()> {
        trace!("[{}] > sending {:?}", self.addr, &message);
        self.messages.send(message).await
    }

    async fn receive(&mut self) -> Result<Message> {
        loop {
            // every frame, keep-alives included, restarts the read timeout
            match timeout(self.read_timeout, self.messages.next()).await {
                Ok(Some(Ok(Message::KeepAlive))) => {
                    trace!("[{}] < keep-alive", self.addr);
                }
                Ok(Some(Ok(message))) => {
                    trace!("[{}] < got {:?}", self.addr, message);
                    return Ok(message);
                }
                Ok(Some(Err(err))) => return Err(err),
                Ok(None) => return Err(Error::ConnectionClosed),
                Err(_) => return Err(Error::timed_out("read", self.read_timeout)),
            }
        }
    }
}
