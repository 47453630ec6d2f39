//! HOP handler: broker a circuit between a source and a destination.
//!
//! State machine per request:
//! `AwaitingMessage -> {Rejected, CanHopAck, Circuiting} -> {Spliced, Failed}`.
//! Every terminal failure answers the source with a status code before the
//! handler returns; the returned `Result` is the authoritative outcome.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use detour_core::addr::Multiaddr;
use detour_core::io::{splice_bidirectional, FramedStream, SpliceMetrics};
use detour_core::peer::PeerId;
use detour_core::transport::Transport;
use detour_core::{RelayStream, PROTOCOL_ID};
use detour_metrics::{
    record_circuit_closed, record_circuit_error, record_circuit_established, record_relayed_bytes,
};
use detour_proto::{CircuitRelay, MessageType, Status};

use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::utils::{shutdown_source, validate_peer, write_status, AddrSide};

/// Byte accounting for spliced circuits.
struct CircuitCounters;

impl SpliceMetrics for CircuitCounters {
    fn record_forward(&self, bytes: u64) {
        record_relayed_bytes("forward", bytes);
    }
    fn record_backward(&self, bytes: u64) {
        record_relayed_bytes("backward", bytes);
    }
}

/// Relay-side HOP/CAN_HOP handler.
pub struct Hop<T: Transport> {
    transport: Arc<T>,
    config: RelayConfig,
}

impl<T: Transport> Hop<T> {
    pub fn new(transport: Arc<T>, config: RelayConfig) -> Self {
        Self { transport, config }
    }

    /// Handle one decoded HOP or CAN_HOP request on `src`.
    pub async fn handle<S: RelayStream>(
        &self,
        msg: CircuitRelay,
        mut src: FramedStream<S>,
    ) -> Result<(), RelayError> {
        if !self.config.enabled {
            return self.refuse(&mut src, Status::HopCantSpeakRelay).await;
        }

        // Capability probe: acknowledge and stop. Never dials anywhere.
        if msg.msg_type == MessageType::CanHop {
            write_status(&mut src, Status::Success).await?;
            debug!("answered relay capability probe");
            return Ok(());
        }

        // Validate the request fully before touching the network.
        let Some(dst_wire) = msg.dst_peer.clone() else {
            return self.refuse(&mut src, Status::HopDstMultiaddrInvalid).await;
        };
        let dst_id = PeerId::from_bytes(dst_wire.id.clone());
        if dst_id == self.transport.local_peer() {
            return self.refuse(&mut src, Status::HopCantRelayToSelf).await;
        }

        let src_info = match validate_peer(
            msg.src_peer.as_ref(),
            self.config.max_addr_bytes,
            AddrSide::HopSrc,
        ) {
            Ok(info) => info,
            Err(status) => return self.refuse(&mut src, status).await,
        };
        if src_info.id == dst_id {
            return self.refuse(&mut src, Status::HopCantConnectToSelf).await;
        }
        let mut dst_info = match validate_peer(
            Some(&dst_wire),
            self.config.max_addr_bytes,
            AddrSide::HopDst,
        ) {
            Ok(info) => info,
            Err(status) => return self.refuse(&mut src, status).await,
        };
        if dst_info.addrs.is_empty() {
            // No addresses supplied; fall back to the bare identity address.
            dst_info.add_addr(Multiaddr::from_peer(&dst_id));
        }

        // Passive relays only serve destinations they already talk to.
        if !self.config.active && !self.transport.is_peer_connected(&dst_id) {
            return self.refuse(&mut src, Status::HopNoConnToDst).await;
        }

        let dst_stream = match self.transport.dial(&dst_info, PROTOCOL_ID).await {
            Ok(stream) => stream,
            Err(err) => {
                debug!(dst = %dst_id, error = %err, "destination dial failed");
                return self.refuse(&mut src, Status::HopCantDialDst).await;
            }
        };

        self.circuit(msg, src, dst_stream, &src_info.id, &dst_id).await
    }

    /// Run the circuiting phase: acknowledge the source, forward the request
    /// to the destination, await its verdict, then splice.
    async fn circuit<S: RelayStream>(
        &self,
        msg: CircuitRelay,
        mut src: FramedStream<S>,
        dst_stream: T::Stream,
        src_id: &PeerId,
        dst_id: &PeerId,
    ) -> Result<(), RelayError> {
        // SUCCESS must reach the source strictly before the STOP frame
        // reaches the destination: the source starts writing raw payload the
        // moment it sees SUCCESS.
        write_status(&mut src, Status::Success).await?;

        let mut dst = FramedStream::new(
            dst_stream,
            self.config.handshake_timeout(),
            self.config.max_frame_bytes,
        );
        let stop = CircuitRelay {
            msg_type: MessageType::Stop,
            src_peer: msg.src_peer,
            dst_peer: msg.dst_peer,
            code: None,
        };
        if let Err(err) = dst.write_frame(&stop.encoded()).await {
            record_circuit_error(Status::HopCantOpenDstStream.class());
            let _ = write_status(&mut src, Status::HopCantOpenDstStream).await;
            shutdown_source(src).await;
            return Err(err.into());
        }

        let verdict = match self.read_status(&mut dst).await {
            Ok(status) => status,
            Err(err) => {
                record_circuit_error(err.error_type());
                shutdown_source(src).await;
                return Err(err);
            }
        };
        if !verdict.is_success() {
            record_circuit_error(verdict.class());
            shutdown_source(src).await;
            return Err(RelayError::DestinationRefused(verdict));
        }

        record_circuit_established();
        debug!(src = %src_id, dst = %dst_id, "circuit spliced");

        let started = Instant::now();
        let result = splice_bidirectional(
            src.release(),
            dst.release(),
            self.config.idle_timeout(),
            self.config.splice_buffer_size,
            &CircuitCounters,
        )
        .await;
        record_circuit_closed(started.elapsed().as_secs_f64());
        debug!(src = %src_id, dst = %dst_id, "circuit closed");

        result.map_err(RelayError::Io)
    }

    async fn read_status(&self, dst: &mut FramedStream<T::Stream>) -> Result<Status, RelayError> {
        let frame = dst.read_frame().await?;
        let reply = CircuitRelay::decode(&frame)?;
        match (reply.msg_type, reply.code) {
            (MessageType::Status, Some(code)) => Ok(code),
            (other, _) => Err(RelayError::UnexpectedType(other)),
        }
    }

    /// Refuse the request: answer `status`, then surface it as the outcome.
    async fn refuse<S: RelayStream>(
        &self,
        src: &mut FramedStream<S>,
        status: Status,
    ) -> Result<(), RelayError> {
        record_circuit_error(status.class());
        if let Err(err) = write_status(src, status).await {
            debug!(error = %err, "status write failed");
        }
        Err(RelayError::Rejected(status))
    }
}
