//! Bidirectional byte pump with half-close propagation.

use socket2::SockRef;
use std::io;
use std::net::Shutdown;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

const BUF_SIZE: usize = 8 * 1024;

/// Read half that can shut down its direction without closing the socket.
pub trait ReadHalfClose: AsyncRead + Unpin + Send {
    fn read_half_close(&self) -> io::Result<()>;
}

/// A stream the pipe can split into a readable half and a writable half.
/// The writable half is half-closed through `AsyncWriteExt::shutdown`.
pub trait Duplex: Send + 'static {
    type Reader: ReadHalfClose + 'static;
    type Writer: AsyncWrite + Unpin + Send + 'static;

    fn into_halves(self) -> (Self::Reader, Self::Writer);
}

impl ReadHalfClose for OwnedReadHalf {
    fn read_half_close(&self) -> io::Result<()> {
        let stream: &TcpStream = self.as_ref();
        SockRef::from(stream).shutdown(Shutdown::Read)
    }
}

impl Duplex for TcpStream {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    fn into_halves(self) -> (OwnedReadHalf, OwnedWriteHalf) {
        self.into_split()
    }
}

/// Bytes moved through a connection manager's pipes.
#[derive(Debug, Default)]
pub struct Statistic {
    /// Bytes read from targets (target -> source)
    read: AtomicU64,
    /// Bytes written to targets (source -> target)
    written: AtomicU64,
}

impl Statistic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> u64 {
        self.read.load(Ordering::Relaxed)
    }

    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Zeroes both counters and returns the previous `(read, written)`.
    pub fn reset(&self) -> (u64, u64) {
        (
            self.read.swap(0, Ordering::Relaxed),
            self.written.swap(0, Ordering::Relaxed),
        )
    }
}

/// Pumps bytes both ways until each direction has finished.
///
/// Returns `(read, written)`: bytes read from the target and bytes written
/// to it.
pub async fn pipe<S, T>(source: S, target: T, stats: &Statistic) -> (u64, u64)
where
    S: Duplex,
    T: Duplex,
{
    let (source_read, source_write) = source.into_halves();
    let (target_read, target_write) = target.into_halves();

    let read_loop = copy_loop(target_read, source_write, "read", &stats.read);
    let write_loop = copy_loop(source_read, target_write, "write", &stats.written);

    tokio::join!(read_loop, write_loop)
}

async fn copy_loop<R, W>(
    mut reader: R,
    mut writer: W,
    name: &'static str,
    counter: &AtomicU64,
) -> u64
where
    R: ReadHalfClose,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total = 0u64;

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => {
                debug!(direction = name, total, "eof");
                if let Err(e) = reader.read_half_close() {
                    debug!(direction = name, error = %e, "fail to close(read) source conn");
                }
                if let Err(e) = writer.shutdown().await {
                    debug!(direction = name, error = %e, "fail to close(write) target conn");
                }
                return total;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(direction = name, error = %e, "read failed");
                if let Err(e) = writer.shutdown().await {
                    debug!(direction = name, error = %e, "fail to close(write) target conn");
                }
                return total;
            }
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            warn!(direction = name, error = %e, "write failed");
            if let Err(e) = reader.read_half_close() {
                debug!(direction = name, error = %e, "fail to close(read) source conn");
            }
            return total;
        }

        total += n as u64;
        counter.fetch_add(n as u64, Ordering::Relaxed);
    }
}
