use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};
use log::{info, warn};
use peer_transfer::{Config, DownloadSession, Notification, Sha1, TorrentInfo};
use tokio::sync::mpsc;

const USAGE: &str = "usage: peer-transfer <info-hash-hex> <piece-length> <total-length> \
                     <pieces-file> <output-file> <peer-addr>...";

struct Args {
    info_hash: Sha1,
    piece_length: usize,
    total_length: usize,
    pieces_file: PathBuf,
    output_file: PathBuf,
    peers: Vec<SocketAddr>,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut next = |name: &str| {
        args.next()
            .with_context(|| format!("missing {}\n{}", name, USAGE))
    };
    let info_hash = Sha1::from_hex(&next("info hash")?)?;
    let piece_length = next("piece length")?
        .parse::<usize>()
        .context("invalid piece length")?;
    let total_length = next("total length")?
        .parse::<usize>()
        .context("invalid total length")?;
    let pieces_file = PathBuf::from(next("pieces file")?);
    let output_file = PathBuf::from(next("output file")?);
    let peers = args
        .map(|addr| {
            addr.parse::<SocketAddr>()
                .with_context(|| format!("invalid peer address {:?}", addr))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    if peers.is_empty() {
        bail!("at least one peer address is required\n{}", USAGE);
    }
    Ok(Args {
        info_hash,
        piece_length,
        total_length,
        pieces_file,
        output_file,
        peers,
    })
}

fn log_notification(notification: Notification) {
    match notification {
        Notification::Probing {
            address,
            index,
            total,
        } => info!("trying peer {} ({}/{})", address, index + 1, total),
        Notification::PeerRejected { address, reason } => {
            warn!("peer {} rejected: {}", address, reason)
        }
        Notification::PeerSelected { address } => info!("downloading from {}", address),
        Notification::PieceVerified {
            piece,
            downloaded,
            total,
        } => info!(
            "piece {} verified ({}/{} bytes)",
            piece, downloaded, total
        ),
        Notification::Completed { length, elapsed } => {
            info!("download complete: {} bytes in {:?}", length, elapsed)
        }
        Notification::Failed { kind, reason } => warn!("download failed ({:?}): {}", kind, reason),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = parse_args()?;
    let pieces = tokio::fs::read(&args.pieces_file)
        .await
        .with_context(|| format!("unable to read {}", args.pieces_file.display()))?;
    let torrent = TorrentInfo::new(
        args.info_hash,
        args.piece_length,
        args.total_length,
        Sha1::split_concatenated(&pieces)?,
    )?;

    let (tx, mut rx) = mpsc::channel(64);
    let session = DownloadSession::new(torrent, Config::new()).with_notifications(tx);

    let cancellation = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, shutting down...");
            cancellation.cancel();
        }
    });
    let notifier = tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            log_notification(notification);
        }
    });

    let result = session.download(&args.peers).await;
    drop(session);
    notifier.await?;
    let result = result?;

    tokio::fs::write(&args.output_file, &result.content)
        .await
        .with_context(|| format!("unable to write {}", args.output_file.display()))?;
    info!(
        "wrote {} bytes to {}",
        result.content.len(),
        args.output_file.display()
    );
    Ok(())
}
