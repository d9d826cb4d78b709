use std::net::SocketAddr;
use std::time::Duration;

use futures::stream::{self, BoxStream, FuturesUnordered};
use futures::StreamExt;
use log::{debug, info};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::session::ConnectStrategy;

/// A candidate peer and the outcome of dialing it.
#[derive(Debug)]
pub struct Candidate {
    /// Position of the address in the list given to [`candidates`].
    pub index: usize,
    pub addr: SocketAddr,
    pub socket: Result<TcpStream>,
}

pub type Candidates = BoxStream<'static, Candidate>;

/// Opens a TCP connection to `addr`, giving up after `connect_timeout`.
pub async fn dial(addr: SocketAddr, connect_timeout: Duration) -> Result<TcpStream> {
    info!("[{}] connecting...", addr);
    let socket = timeout(connect_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::timed_out("connect", connect_timeout))??;
    debug!("[{}] connected", addr);
    Ok(socket)
}

/// Dials `addrs` according to `strategy`. Parallel dialing yields candidates as their
/// connections complete, so `index` is not necessarily ascending.
///
/// Sequential dialing is lazy: the next address is only dialed once the stream is polled again,
/// so a candidate that passes admission leaves the remaining addresses untouched.
pub fn candidates(
    addrs: Vec<SocketAddr>,
    strategy: ConnectStrategy,
    connect_timeout: Duration,
) -> Candidates {
    let attempt = move |(index, addr): (usize, SocketAddr)| async move {
        Candidate {
            index,
            addr,
            socket: dial(addr, connect_timeout).await,
        }
    };
    match strategy {
        ConnectStrategy::Sequential => stream::iter(addrs.into_iter().enumerate())
            .then(attempt)
            .boxed(),
        ConnectStrategy::Parallel => addrs
            .into_iter()
            .enumerate()
            .map(attempt)
            .collect::<FuturesUnordered<_>>()
            .boxed(),
    }
}
