//! Stream adapter replaying buffered bytes ahead of the inner stream.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Yields a stored prefix before delegating reads to the inner stream;
/// writes pass straight through.
///
/// This is the "raw remainder" shape a released [`super::FramedStream`]
/// produces: whatever the framed reader pulled off the wire beyond its last
/// frame must reach the spliced circuit, not vanish.
#[derive(Debug)]
pub struct PrefixedStream<S> {
    prefix: Bytes,
    inner: S,
}

impl<S> PrefixedStream<S> {
    pub fn new(prefix: Bytes, inner: S) -> Self {
        Self { prefix, inner }
    }

    /// Bytes of prefix not yet read.
    pub fn prefix_remaining(&self) -> usize {
        self.prefix.len()
    }

    /// Unwrap the inner stream, dropping any unread prefix.
    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PrefixedStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if !self.prefix.is_empty() {
            let take = self.prefix.len().min(buf.remaining());
            buf.put_slice(&self.prefix[..take]);
            self.prefix.advance(take);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PrefixedStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, data)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn prefix_then_inner() {
        let (mut client, server) = duplex(1024);
        let mut stream = PrefixedStream::new(Bytes::from_static(b"head:"), server);

        client.write_all(b"tail").await.unwrap();
        drop(client);

        let mut out = Vec::new();
        stream.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"head:tail");
    }

    #[tokio::test]
    async fn partial_reads_drain_prefix() {
        let (_client, server) = duplex(1024);
        let mut stream = PrefixedStream::new(Bytes::from_static(b"abcdef"), server);

        let mut buf = [0u8; 4];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"abcd");
        assert_eq!(stream.prefix_remaining(), 2);

        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ef");
        assert_eq!(stream.prefix_remaining(), 0);
    }

    #[tokio::test]
    async fn writes_bypass_prefix() {
        let (mut client, server) = duplex(1024);
        let mut stream = PrefixedStream::new(Bytes::from_static(b"unread"), server);

        stream.write_all(b"direct").await.unwrap();
        let mut buf = [0u8; 6];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"direct");
    }
}
