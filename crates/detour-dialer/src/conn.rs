//! The connection type produced by a successful negotiation.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use detour_core::peer::PeerInfo;
use detour_core::RelayStream;

/// A circuit to a destination peer.
///
/// The stream is boxed so chained circuits stay type-uniform: a pipe through
/// N relays reads and writes exactly like a direct one.
pub struct CircuitConn {
    pub stream: Box<dyn RelayStream>,
    /// The destination the circuit terminates at.
    pub peer: PeerInfo,
}

impl CircuitConn {
    pub fn new(stream: Box<dyn RelayStream>, peer: PeerInfo) -> Self {
        Self { stream, peer }
    }
}

impl fmt::Debug for CircuitConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitConn")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for CircuitConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for CircuitConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
