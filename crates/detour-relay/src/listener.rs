//! Protocol registration and per-stream dispatch.
//!
//! One protocol id serves the whole circuit vocabulary. Each inbound stream
//! gets exactly one framed read: the decoded type routes to the hop or stop
//! handler, anything else is answered with `STATUS(INVALID_MSG_TYPE)`. A bad
//! request never takes the listener down.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use detour_core::addr::Multiaddr;
use detour_core::io::FramedStream;
use detour_core::peer::PeerInfo;
use detour_core::transport::{InboundStream, Transport};
use detour_core::{RelayStream, PROTOCOL_ID};
use detour_metrics::{record_error, record_invalid_message, record_relay_request};
use detour_proto::{CircuitRelay, MessageType, Status};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::hop::Hop;
use crate::stop::{RelayedConn, Stop};
use crate::utils::write_status;

/// The circuit relay listener.
///
/// Accepted STOP circuits are delivered on the channel handed to
/// [`Listener::new`]; the application treats them like any other inbound
/// connection.
pub struct Listener<T: Transport> {
    transport: Arc<T>,
    config: RelayConfig,
    hop: Hop<T>,
    stop: Stop<T>,
    conn_tx: mpsc::Sender<RelayedConn>,
}

impl<T: Transport> Listener<T> {
    pub fn new(
        transport: Arc<T>,
        config: RelayConfig,
        conn_tx: mpsc::Sender<RelayedConn>,
    ) -> Arc<Self> {
        Arc::new(Self {
            hop: Hop::new(Arc::clone(&transport), config.clone()),
            stop: Stop::new(Arc::clone(&transport), config.clone()),
            transport,
            config,
            conn_tx,
        })
    }

    /// Register the protocol and serve inbound streams until shutdown.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<(), RelayError> {
        let mut inbound = self.transport.handle(PROTOCOL_ID).await?;
        info!(
            protocol = PROTOCOL_ID,
            enabled = self.config.enabled,
            active = self.config.active,
            "circuit relay listening"
        );

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("shutdown signal received, leaving accept loop");
                    break;
                }

                next = inbound.recv() => {
                    let Some(InboundStream { stream, remote }) = next else {
                        warn!("transport closed the inbound stream channel");
                        break;
                    };

                    let remote_label = remote
                        .as_ref()
                        .map(|p| p.id.to_string())
                        .unwrap_or_else(|| "unknown".into());
                    let span = info_span!("circuit", remote = %remote_label);
                    let this = Arc::clone(&self);
                    tokio::spawn(
                        async move {
                            if let Err(err) = this.dispatch(stream, remote).await {
                                record_error(err.error_type());
                                debug!(error = %err, "relay stream closed with error");
                            }
                        }
                        .instrument(span),
                    );
                }
            }
        }

        self.transport.unhandle(PROTOCOL_ID).await;
        info!("circuit relay stopped");
        Ok(())
    }

    /// Read, decode and route the first frame of one inbound stream.
    ///
    /// Public so hosts that route relayed connections back onto the circuit
    /// protocol (chained relays) can feed them here directly.
    pub async fn dispatch<S: RelayStream>(
        &self,
        stream: S,
        remote: Option<PeerInfo>,
    ) -> Result<(), RelayError> {
        let mut sh = FramedStream::new(
            stream,
            self.config.handshake_timeout(),
            self.config.max_frame_bytes,
        );

        let frame = match sh.read_frame().await {
            Ok(frame) => frame,
            Err(err) if err.is_oversize() => {
                record_invalid_message();
                let _ = write_status(&mut sh, Status::HopMsgTooLong).await;
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };

        let msg = match CircuitRelay::decode(&frame) {
            Ok(msg) => msg,
            Err(err) => {
                record_invalid_message();
                let _ = write_status(&mut sh, Status::InvalidMsgType).await;
                return Err(err.into());
            }
        };

        match msg.msg_type {
            MessageType::Hop => {
                record_relay_request("hop");
                self.hop.handle(msg, sh).await
            }
            MessageType::CanHop => {
                record_relay_request("can_hop");
                self.hop.handle(msg, sh).await
            }
            MessageType::Stop => {
                record_relay_request("stop");
                let conn = self.stop.handle(msg, sh, remote).await?;
                self.conn_tx
                    .send(conn)
                    .await
                    .map_err(|_| RelayError::Delivery)
            }
            other => {
                record_invalid_message();
                let _ = write_status(&mut sh, Status::InvalidMsgType).await;
                Err(RelayError::UnexpectedType(other))
            }
        }
    }

    /// The circuit addresses this node can advertise: each configured relay
    /// address (or else each direct transport address) wrapped with the
    /// circuit marker and this node's identity.
    pub fn local_addrs(&self) -> Vec<Multiaddr> {
        let id = self.transport.local_peer();
        let base = if self.config.advertised_relays.is_empty() {
            self.transport.local_addrs()
        } else {
            self.config.advertised_relays.clone()
        };
        base.iter().map(|addr| addr.circuit_through(&id)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{read_status_frame, wire_peer, MockTransport, TIMEOUT};
    use bytes::BytesMut;
    use detour_core::peer::PeerId;
    use detour_proto::write_uvarint;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};

    fn listener(
        transport: Arc<MockTransport>,
        config: RelayConfig,
    ) -> (Arc<Listener<MockTransport>>, mpsc::Receiver<RelayedConn>) {
        let (tx, rx) = mpsc::channel(4);
        (Listener::new(transport, config, tx), rx)
    }

    #[tokio::test]
    async fn unknown_type_gets_invalid_msg_type() {
        let transport = MockTransport::new("relay");
        let (listener, _rx) = listener(Arc::clone(&transport), RelayConfig::default());

        let (mut far, near) = duplex(4096);
        let mut msg = CircuitRelay::can_hop();
        msg.msg_type = MessageType::Unknown(42);
        let payload = msg.encoded();
        let mut wire = BytesMut::new();
        write_uvarint(&mut wire, payload.len() as u64);
        wire.extend_from_slice(&payload);
        far.write_all(&wire).await.unwrap();

        let err = listener.dispatch(near, None).await.unwrap_err();
        assert!(matches!(err, RelayError::UnexpectedType(MessageType::Unknown(42))));
        assert_eq!(read_status_frame(far).await, Status::InvalidMsgType);
    }

    #[tokio::test]
    async fn undecodable_frame_gets_invalid_msg_type() {
        let transport = MockTransport::new("relay");
        let (listener, _rx) = listener(Arc::clone(&transport), RelayConfig::default());

        let (mut far, near) = duplex(4096);
        // A frame whose payload is a single stray byte.
        far.write_all(&[1, 0x07]).await.unwrap();

        let err = listener.dispatch(near, None).await.unwrap_err();
        assert!(matches!(err, RelayError::Decode(_)));
        assert_eq!(read_status_frame(far).await, Status::InvalidMsgType);
    }

    #[tokio::test]
    async fn oversize_first_frame_gets_msg_too_long() {
        let transport = MockTransport::new("relay");
        let (listener, _rx) = listener(Arc::clone(&transport), RelayConfig::default());

        let (mut far, near) = duplex(8192);
        let mut wire = BytesMut::new();
        write_uvarint(&mut wire, 2000); // over the 1024 default
        far.write_all(&wire).await.unwrap();

        let err = listener.dispatch(near, None).await.unwrap_err();
        assert!(matches!(err, RelayError::Frame(_)));
        assert_eq!(read_status_frame(far).await, Status::HopMsgTooLong);
    }

    #[tokio::test]
    async fn stop_requests_are_delivered_to_the_application() {
        let transport = MockTransport::new("dest");
        let (listener, mut rx) = listener(Arc::clone(&transport), RelayConfig::default());

        let (far, near) = duplex(4096);
        let msg = CircuitRelay::stop(
            wire_peer("source", &["/ip4/10.0.0.1/tcp/4001"]),
            wire_peer("dest", &[]),
        );
        let payload = msg.encoded();

        let driver = tokio::spawn(async move {
            let mut sh = FramedStream::new(far, TIMEOUT, 1024);
            sh.write_frame(&payload).await.unwrap();
            let frame = sh.read_frame().await.unwrap();
            assert_eq!(
                CircuitRelay::decode(&frame).unwrap().code,
                Some(Status::Success)
            );
            let mut raw = sh.release();
            raw.write_all(b"hello destination").await.unwrap();
            raw.shutdown().await.unwrap();
        });

        listener.dispatch(near, None).await.unwrap();
        let mut conn = rx.recv().await.expect("delivered connection");
        assert_eq!(conn.source.id, PeerId::from_bytes(&b"source"[..]));

        let mut seen = Vec::new();
        conn.read_to_end(&mut seen).await.unwrap();
        assert_eq!(seen, b"hello destination");
        driver.await.unwrap();
    }

    #[tokio::test]
    async fn hop_requests_route_to_the_hop_handler() {
        let transport = MockTransport::new("relay");
        let config = RelayConfig {
            enabled: true,
            ..RelayConfig::default()
        };
        let (listener, _rx) = listener(Arc::clone(&transport), config);

        let (far, near) = duplex(4096);
        let mut sh = FramedStream::new(far, TIMEOUT, 1024);
        sh.write_frame(&CircuitRelay::can_hop().encoded())
            .await
            .unwrap();

        listener.dispatch(near, None).await.unwrap();
        let frame = sh.read_frame().await.unwrap();
        assert_eq!(
            CircuitRelay::decode(&frame).unwrap().code,
            Some(Status::Success)
        );
        assert_eq!(transport.dial_count(), 0);
    }

    #[test]
    fn advertised_circuit_addresses() {
        let transport = MockTransport::new("node");
        let (listener1, _rx) = listener(Arc::clone(&transport), RelayConfig::default());

        let addrs = listener1.local_addrs();
        assert_eq!(addrs.len(), 1);
        let id = transport.local_peer();
        assert_eq!(
            addrs[0].as_str(),
            format!("/ip4/127.0.0.1/tcp/4001/p2p-circuit/p2p/{id}")
        );
        assert_eq!(addrs[0].peer_id(), Some(id));

        let config = RelayConfig {
            advertised_relays: vec![Multiaddr::from("/dns4/relay.example/tcp/443")],
            ..RelayConfig::default()
        };
        let (listener2, _rx) = listener(Arc::clone(&transport), config);
        let addrs = listener2.local_addrs();
        assert_eq!(addrs.len(), 1);
        assert!(addrs[0].as_str().starts_with("/dns4/relay.example/tcp/443/p2p-circuit"));
    }
}
