//! Length-prefixed framing over a raw duplex stream.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use detour_proto::varint::write_uvarint;

use super::prefixed::PrefixedStream;

/// Frame length headers are varints; three bytes bound them at 2 MiB, far
/// above any configurable frame limit.
const MAX_LEN_HEADER_BYTES: usize = 3;

/// Errors from framed reads and writes.
///
/// Oversize frames get their own variant so handlers can answer with the
/// protocol's too-long status codes instead of a generic failure.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("handshake timed out")]
    Timeout,
    #[error("frame length {len} exceeds maximum {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("malformed frame length header")]
    InvalidLength,
    #[error("stream closed before a full frame arrived")]
    Eof,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FrameError::Timeout)
    }

    pub fn is_oversize(&self) -> bool {
        matches!(self, FrameError::FrameTooLarge { .. })
    }
}

/// A handshake-style framed view over a duplex stream.
///
/// Every read and write is bounded by the handshake timeout. Bytes read past
/// the current frame stay buffered and are carried into the stream returned
/// by [`FramedStream::release`] — the peer may legally pipeline raw payload
/// right behind its last frame.
///
/// `release` consumes the handler, so use-after-release is a compile error
/// rather than a runtime one.
pub struct FramedStream<S> {
    stream: S,
    buf: BytesMut,
    timeout: Duration,
    max_len: usize,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    pub fn new(stream: S, timeout: Duration, max_len: usize) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(256),
            timeout,
            max_len,
        }
    }

    /// Read one length-prefixed frame.
    pub async fn read_frame(&mut self) -> Result<Bytes, FrameError> {
        tokio::time::timeout(self.timeout, self.read_frame_inner())
            .await
            .map_err(|_| FrameError::Timeout)?
    }

    async fn read_frame_inner(&mut self) -> Result<Bytes, FrameError> {
        loop {
            if let Some((len, header)) = decode_len(&self.buf)? {
                if len > self.max_len {
                    return Err(FrameError::FrameTooLarge {
                        len,
                        max: self.max_len,
                    });
                }
                if self.buf.len() >= header + len {
                    self.buf.advance(header);
                    return Ok(self.buf.split_to(len).freeze());
                }
            }
            if self.stream.read_buf(&mut self.buf).await? == 0 {
                return Err(FrameError::Eof);
            }
        }
    }

    /// Length-prefix and write one frame, flushing the stream.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        self.write_frames(&[payload]).await
    }

    /// Length-prefix and write a batch of frames with a single flush.
    pub async fn write_frames(&mut self, frames: &[&[u8]]) -> Result<(), FrameError> {
        tokio::time::timeout(self.timeout, self.write_frames_inner(frames))
            .await
            .map_err(|_| FrameError::Timeout)?
    }

    async fn write_frames_inner(&mut self, frames: &[&[u8]]) -> Result<(), FrameError> {
        let mut out = BytesMut::with_capacity(
            frames.iter().map(|f| f.len() + MAX_LEN_HEADER_BYTES).sum(),
        );
        for frame in frames {
            if frame.len() > self.max_len {
                return Err(FrameError::FrameTooLarge {
                    len: frame.len(),
                    max: self.max_len,
                });
            }
            write_uvarint(&mut out, frame.len() as u64);
            out.extend_from_slice(frame);
        }
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Detach the raw remainder of the stream: buffered overread bytes first,
    /// then everything still to come on the wire.
    pub fn release(self) -> PrefixedStream<S> {
        PrefixedStream::new(self.buf.freeze(), self.stream)
    }
}

/// Decode a frame length header from the front of `buf`.
///
/// `Ok(None)` means more bytes are needed.
fn decode_len(buf: &[u8]) -> Result<Option<(usize, usize)>, FrameError> {
    let mut value: usize = 0;
    for i in 0..MAX_LEN_HEADER_BYTES {
        let Some(&byte) = buf.get(i) else {
            return Ok(None);
        };
        value |= usize::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    Err(FrameError::InvalidLength)
}
