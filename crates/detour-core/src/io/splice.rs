//! Bidirectional splice of two duplex streams.
//!
//! Both directions are driven as independent poll-based state machines inside
//! one future, so back-pressure on one direction never stalls the other. That
//! matters in relay chains, where a stalled leg would otherwise deadlock the
//! whole circuit.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Instant;

/// Byte accounting hooks for a spliced circuit.
///
/// `forward` is the source→destination direction, `backward` the reverse.
pub trait SpliceMetrics {
    fn record_forward(&self, bytes: u64);
    fn record_backward(&self, bytes: u64);
}

/// Metrics sink that records nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl SpliceMetrics for NoOpMetrics {
    #[inline]
    fn record_forward(&self, _bytes: u64) {}
    #[inline]
    fn record_backward(&self, _bytes: u64) {}
}

/// One direction of the splice: read, write out, flush, then propagate EOF as
/// a shutdown of the write side.
enum Leg {
    Reading,
    Writing { at: usize, end: usize },
    Flushing(usize),
    Closing,
    Done,
}

enum LegPoll {
    /// A chunk was flushed through; carries the byte count.
    Moved(usize),
    /// EOF reached and the peer's write side shut down.
    Finished,
}

fn poll_leg<R, W>(
    cx: &mut Context<'_>,
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    leg: &mut Leg,
) -> Poll<io::Result<LegPoll>>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    loop {
        match leg {
            Leg::Reading => {
                let mut read_buf = ReadBuf::new(buf);
                match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
                    Poll::Ready(Ok(())) => {
                        let n = read_buf.filled().len();
                        *leg = if n == 0 {
                            Leg::Closing
                        } else {
                            Leg::Writing { at: 0, end: n }
                        };
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            Leg::Writing { at, end } => {
                match Pin::new(&mut *writer).poll_write(cx, &buf[*at..*end]) {
                    Poll::Ready(Ok(n)) => {
                        *at += n;
                        if at >= end {
                            *leg = Leg::Flushing(*end);
                        }
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            Leg::Flushing(moved) => {
                let moved = *moved;
                match Pin::new(&mut *writer).poll_flush(cx) {
                    Poll::Ready(Ok(())) => {
                        *leg = Leg::Reading;
                        return Poll::Ready(Ok(LegPoll::Moved(moved)));
                    }
                    Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
                    Poll::Pending => return Poll::Pending,
                }
            }
            Leg::Closing => match Pin::new(&mut *writer).poll_shutdown(cx) {
                Poll::Ready(_) => {
                    *leg = Leg::Done;
                    return Poll::Ready(Ok(LegPoll::Finished));
                }
                Poll::Pending => return Poll::Pending,
            },
            Leg::Done => return Poll::Ready(Ok(LegPoll::Finished)),
        }
    }
}

/// Splice `source` and `destination` together until both directions finish,
/// either side errors, or nothing moves for `idle_timeout`.
///
/// Closing either stream propagates: EOF on one leg shuts down the opposite
/// write side, and an error tears down both legs at once. There is no
/// buffering beyond the two per-direction copy buffers.
pub async fn splice_bidirectional<A, B, M>(
    source: A,
    destination: B,
    idle_timeout: Duration,
    buffer_size: usize,
    metrics: &M,
) -> io::Result<()>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
    M: SpliceMetrics,
{
    let (mut src_r, mut src_w) = tokio::io::split(source);
    let (mut dst_r, mut dst_w) = tokio::io::split(destination);

    let mut fwd_buf = vec![0u8; buffer_size];
    let mut bwd_buf = vec![0u8; buffer_size];
    let mut fwd = Leg::Reading;
    let mut bwd = Leg::Reading;
    let mut fwd_done = false;
    let mut bwd_done = false;

    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        if fwd_done && bwd_done {
            return Ok(());
        }

        // Poll both directions under one waker registration; either may make
        // progress independently of the other.
        let both = std::future::poll_fn(|cx| {
            let mut any_ready = false;
            let mut moved = false;
            let mut failed: Option<io::Error> = None;

            if !fwd_done {
                match poll_leg(cx, &mut src_r, &mut dst_w, &mut fwd_buf, &mut fwd) {
                    Poll::Ready(Ok(LegPoll::Moved(n))) => {
                        metrics.record_forward(n as u64);
                        moved = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(LegPoll::Finished)) => {
                        fwd_done = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err(e)) => {
                        failed = Some(e);
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }

            if !bwd_done {
                match poll_leg(cx, &mut dst_r, &mut src_w, &mut bwd_buf, &mut bwd) {
                    Poll::Ready(Ok(LegPoll::Moved(n))) => {
                        metrics.record_backward(n as u64);
                        moved = true;
                        any_ready = true;
                    }
                    Poll::Ready(Ok(LegPoll::Finished)) => {
                        bwd_done = true;
                        any_ready = true;
                    }
                    Poll::Ready(Err(e)) => {
                        failed = Some(e);
                        any_ready = true;
                    }
                    Poll::Pending => {}
                }
            }

            if let Some(e) = failed {
                return Poll::Ready(Err(e));
            }
            if any_ready {
                Poll::Ready(Ok(moved))
            } else {
                Poll::Pending
            }
        });

        tokio::select! {
            result = both => {
                if result? {
                    idle.as_mut().reset(Instant::now() + idle_timeout);
                }
            }
            _ = &mut idle => {
                return Ok(());
            }
        }
    }
}
