use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

const COPY_BUFFER: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct BridgeStats {
    pub to_remote: u64,
    pub to_local: u64,
}

impl BridgeStats {
    pub fn total(&self) -> u64 {
        self.to_remote + self.to_local
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum BridgeEnd {
    LocalClosed,
    RemoteClosed,
    Cancelled,
    Error(String),
}

#[derive(Debug)]
pub struct BridgeOutcome {
    pub ended: BridgeEnd,
    pub stats: BridgeStats,
}

/// Pumps bytes between one local socket and one remote forwarding channel
/// until either side closes or errors, or the shutdown signal fires. Byte
/// order is preserved per direction; a clean close on one side flushes
/// everything received so far to the other side before teardown.
pub async fn bridge<L, R>(
    local: L,
    remote: R,
    mut shutdown: watch::Receiver<bool>,
) -> BridgeOutcome
where
    L: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let (mut local_read, mut local_write) = tokio::io::split(local);
    let (mut remote_read, mut remote_write) = tokio::io::split(remote);

    let to_remote = AtomicU64::new(0);
    let to_local = AtomicU64::new(0);

    let upstream = pump(&mut local_read, &mut remote_write, &to_remote);
    let downstream = pump(&mut remote_read, &mut local_write, &to_local);
    tokio::pin!(upstream, downstream);

    // The first side to finish wins; the other direction's half-open halves
    // are dropped on return, closing both endpoints.
    let ended = tokio::select! {
        result = &mut upstream => match result {
            Ok(()) => BridgeEnd::LocalClosed,
            Err(err) => BridgeEnd::Error(err.to_string()),
        },
        result = &mut downstream => match result {
            Ok(()) => BridgeEnd::RemoteClosed,
            Err(err) => BridgeEnd::Error(err.to_string()),
        },
        _ = wait_for_shutdown(&mut shutdown) => BridgeEnd::Cancelled,
    };

    BridgeOutcome {
        ended,
        stats: BridgeStats {
            to_remote: to_remote.load(Ordering::Relaxed),
            to_local: to_local.load(Ordering::Relaxed),
        },
    }
}

async fn pump<R, W>(src: &mut R, dst: &mut W, copied: &AtomicU64) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER];
    loop {
        let read = src.read(&mut buf).await?;
        if read == 0 {
            dst.shutdown().await?;
            return Ok(());
        }
        dst.write_all(&buf[..read]).await?;
        copied.fetch_add(read as u64, Ordering::Relaxed);
    }
}

pub(crate) async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        // A dropped sender means the owning session is gone; tear down too.
        if rx.changed().await.is_err() {
            return;
        }
    }
}
