//! STOP handler: accept an inbound relayed circuit at the destination.
//!
//! State machine per request: `AwaitingAddress -> {Invalid, Accepted} -> Delivered`.
//! The handler reads the same structured message shape the hop handler
//! forwards (the shared codec keeps the two in agreement), validates the
//! announced source, acknowledges, and hands the raw remainder to the
//! application as a freshly arrived inbound connection.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use detour_core::io::FramedStream;
use detour_core::peer::PeerInfo;
use detour_core::transport::Transport;
use detour_core::RelayStream;
use detour_metrics::record_circuit_error;
use detour_proto::{CircuitRelay, Status};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::utils::{validate_peer, write_status, AddrSide};

/// A connection delivered by a relay: the raw circuit stream plus who is on
/// the other end and which relay carried it here.
pub struct RelayedConn {
    pub stream: Box<dyn RelayStream>,
    /// The circuit's source peer, as announced and validated.
    pub source: PeerInfo,
    /// The relay the circuit arrived through, when the transport knows it.
    pub relay: Option<PeerInfo>,
}

impl fmt::Debug for RelayedConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayedConn")
            .field("source", &self.source)
            .field("relay", &self.relay)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for RelayedConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for RelayedConn {
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

/// Destination-side STOP handler.
pub struct Stop<T: Transport> {
    transport: Arc<T>,
    config: RelayConfig,
}

impl<T: Transport> Stop<T> {
    pub fn new(transport: Arc<T>, config: RelayConfig) -> Self {
        Self { transport, config }
    }

    /// Handle one decoded STOP request on `sh`.
    ///
    /// On success the caller owns the returned connection; on failure the
    /// requester has been answered and the application never sees anything.
    pub async fn handle<S: RelayStream>(
        &self,
        msg: CircuitRelay,
        mut sh: FramedStream<S>,
        remote: Option<PeerInfo>,
    ) -> Result<RelayedConn, RelayError> {
        let announced = match validate_peer(
            msg.src_peer.as_ref(),
            self.config.max_addr_bytes,
            AddrSide::StopSrc,
        ) {
            Ok(info) => info,
            Err(status) => {
                record_circuit_error(status.class());
                if let Err(err) = write_status(&mut sh, status).await {
                    debug!(error = %err, "status write failed");
                }
                return Err(RelayError::Rejected(status));
            }
        };

        // Fold the announced addresses into whatever record the transport
        // already holds for this peer.
        let mut source = self
            .transport
            .known_peer(&announced.id)
            .unwrap_or_else(|| PeerInfo::new(announced.id.clone()));
        for addr in announced.addrs {
            source.add_addr(addr);
        }

        write_status(&mut sh, Status::Success).await?;
        debug!(source = %source.id, "inbound relayed circuit accepted");

        Ok(RelayedConn {
            stream: Box::new(sh.release()),
            source,
            relay: remote,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{read_status_frame, wire_peer, MockTransport, TIMEOUT};
    use detour_core::addr::Multiaddr;
    use detour_core::peer::PeerId;
    use detour_proto::MessageType;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn stop_msg(src: detour_proto::Peer) -> CircuitRelay {
        CircuitRelay::stop(src, wire_peer("dest", &[]))
    }

    #[tokio::test]
    async fn accepts_and_yields_raw_remainder() {
        let transport = MockTransport::new("dest");
        let stop = Stop::new(Arc::clone(&transport), RelayConfig::default());

        let (far, near) = duplex(4096);
        let sh = FramedStream::new(near, TIMEOUT, 1024);
        let msg = stop_msg(wire_peer("source", &["/ip4/10.0.0.1/tcp/4001"]));

        let handle = tokio::spawn(async move {
            let mut far_sh = FramedStream::new(far, TIMEOUT, 1024);
            let frame = far_sh.read_frame().await.unwrap();
            let reply = CircuitRelay::decode(&frame).unwrap();
            assert_eq!(reply.msg_type, MessageType::Status);
            assert_eq!(reply.code, Some(Status::Success));

            let mut raw = far_sh.release();
            raw.write_all(b"app bytes").await.unwrap();
            raw.shutdown().await.unwrap();
        });

        let mut conn = stop.handle(msg, sh, None).await.unwrap();
        assert_eq!(
            conn.source.id,
            PeerId::from_bytes(&b"source"[..])
        );
        assert_eq!(
            conn.source.addrs,
            vec![Multiaddr::from("/ip4/10.0.0.1/tcp/4001")]
        );

        let mut seen = Vec::new();
        conn.read_to_end(&mut seen).await.unwrap();
        assert_eq!(seen, b"app bytes");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn merges_addresses_into_known_record() {
        let transport = MockTransport::new("dest");
        let known = PeerInfo::with_addrs(
            PeerId::from_bytes(&b"source"[..]),
            vec![Multiaddr::from("/ip4/9.9.9.9/tcp/1")],
        );
        transport.add_known(known);
        let stop = Stop::new(Arc::clone(&transport), RelayConfig::default());

        let (far, near) = duplex(4096);
        let sh = FramedStream::new(near, TIMEOUT, 1024);
        let msg = stop_msg(wire_peer("source", &["/ip4/10.0.0.1/tcp/4001"]));

        let conn = tokio::join!(stop.handle(msg, sh, None), read_status_frame(far)).0.unwrap();
        assert_eq!(conn.source.addrs.len(), 2);
    }

    #[tokio::test]
    async fn invalid_source_is_refused_before_delivery() {
        let transport = MockTransport::new("dest");
        let stop = Stop::new(Arc::clone(&transport), RelayConfig::default());

        let (far, near) = duplex(4096);
        let sh = FramedStream::new(near, TIMEOUT, 1024);
        let msg = stop_msg(wire_peer("source", &["garbage"]));

        let (result, status) = tokio::join!(stop.handle(msg, sh, None), read_status_frame(far));
        assert_eq!(
            result.unwrap_err().status(),
            Some(Status::StopSrcMultiaddrInvalid)
        );
        assert_eq!(status, Status::StopSrcMultiaddrInvalid);
    }

    #[tokio::test]
    async fn oversize_source_addr_is_distinct() {
        let transport = MockTransport::new("dest");
        let stop = Stop::new(Arc::clone(&transport), RelayConfig::default());

        let long = format!("/dns4/{}/tcp/1", "s".repeat(2048));
        let (far, near) = duplex(8192);
        let sh = FramedStream::new(near, TIMEOUT, 8192);
        let msg = stop_msg(wire_peer("source", &[long.as_str()]));

        let (result, status) = tokio::join!(stop.handle(msg, sh, None), read_status_frame(far));
        assert_eq!(
            result.unwrap_err().status(),
            Some(Status::StopSrcAddrTooLong)
        );
        assert_eq!(status, Status::StopSrcAddrTooLong);
    }
}
