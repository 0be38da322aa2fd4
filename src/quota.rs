//! Transfer budget shared by every piped connection of a quota manager.

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::Error;
use crate::pipe::{Duplex, ReadHalfClose};

/// New connections are refused once the combined budget drops to this.
pub const LOW_WATER_MARK: i64 = 100 * 1024;

/// Remaining read/write budget for the current period.
///
/// Charges are never rolled back: a counter may go negative and stays
/// there until the next `refill`.
#[derive(Debug)]
pub struct QuotaLedger {
    ceiling: i64,
    low_water: i64,
    read: AtomicI64,
    written: AtomicI64,
}

impl QuotaLedger {
    pub fn new(ceiling: i64) -> Self {
        Self::with_low_water(ceiling, LOW_WATER_MARK)
    }

    pub fn with_low_water(ceiling: i64, low_water: i64) -> Self {
        Self {
            ceiling,
            low_water,
            read: AtomicI64::new(ceiling),
            written: AtomicI64::new(ceiling),
        }
    }

    pub fn ceiling(&self) -> i64 {
        self.ceiling
    }

    pub fn try_read(&self, n: usize) -> bool {
        charge(&self.read, n)
    }

    pub fn try_write(&self, n: usize) -> bool {
        charge(&self.written, n)
    }

    /// Admission check for a brand-new outbound connection.
    pub fn enough(&self) -> bool {
        self.read.load(Ordering::SeqCst) + self.written.load(Ordering::SeqCst) > self.low_water
    }

    /// Resets both counters to the ceiling, discarding any debt.
    pub fn refill(&self) {
        self.read.store(self.ceiling, Ordering::SeqCst);
        self.written.store(self.ceiling, Ordering::SeqCst);
    }

    /// `(read, written)` budget left.
    pub fn remaining(&self) -> (i64, i64) {
        (
            self.read.load(Ordering::SeqCst),
            self.written.load(Ordering::SeqCst),
        )
    }
}

fn charge(counter: &AtomicI64, n: usize) -> bool {
    let n = n as i64;
    counter.fetch_sub(n, Ordering::SeqCst) - n >= 0
}

/// Target connection whose traffic is charged against a ledger.
pub struct QuotaConn<C> {
    inner: C,
    ledger: Arc<QuotaLedger>,
}

impl<C: Duplex> QuotaConn<C> {
    pub fn new(inner: C, ledger: Arc<QuotaLedger>) -> Self {
        Self { inner, ledger }
    }
}

impl<C: Duplex> Duplex for QuotaConn<C> {
    type Reader = QuotaReader<C::Reader>;
    type Writer = QuotaWriter<C::Writer>;

    fn into_halves(self) -> (Self::Reader, Self::Writer) {
        let (reader, writer) = self.inner.into_halves();
        (
            QuotaReader::new(reader, Arc::clone(&self.ledger)),
            QuotaWriter::new(writer, self.ledger),
        )
    }
}

pin_project! {
    /// Fails a read with `NotEnoughQuota` once the read budget is exceeded.
    pub struct QuotaReader<R> {
        #[pin]
        inner: R,
        ledger: Arc<QuotaLedger>,
    }
}

impl<R> QuotaReader<R> {
    pub fn new(inner: R, ledger: Arc<QuotaLedger>) -> Self {
        Self { inner, ledger }
    }
}

impl<R: AsyncRead> AsyncRead for QuotaReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        match this.inner.poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let n = buf.filled().len() - before;
                if n > 0 && !this.ledger.try_read(n) {
                    return Poll::Ready(Err(Error::NotEnoughQuota.into_io()));
                }
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<R: ReadHalfClose> ReadHalfClose for QuotaReader<R> {
    fn read_half_close(&self) -> io::Result<()> {
        self.inner.read_half_close()
    }
}

pin_project! {
    /// Fails a write with `NotEnoughQuota` once the write budget is exceeded.
    pub struct QuotaWriter<W> {
        #[pin]
        inner: W,
        ledger: Arc<QuotaLedger>,
    }
}

impl<W> QuotaWriter<W> {
    pub fn new(inner: W, ledger: Arc<QuotaLedger>) -> Self {
        Self { inner, ledger }
    }
}

impl<W: AsyncWrite> AsyncWrite for QuotaWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.project();
        match this.inner.poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                if n > 0 && !this.ledger.try_write(n) {
                    return Poll::Ready(Err(Error::NotEnoughQuota.into_io()));
                }
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.project().inner.poll_shutdown(cx)
    }
}
