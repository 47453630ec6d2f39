//! Flat relay dialing with a registry and candidate failover.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use detour_core::addr::Multiaddr;
use detour_core::io::FramedStream;
use detour_core::peer::{peer_from_addr, PeerId, PeerInfo};
use detour_core::transport::{PeerEvent, Transport};
use detour_core::{RelayStream, PROTOCOL_ID};
use detour_metrics::{
    record_dial_failover, record_negotiation, record_relay_added, record_relay_removed,
};
use detour_proto::{CircuitRelay, MessageType, Peer as WirePeer, Status};

use crate::config::DialerConfig;
use crate::conn::CircuitConn;
use crate::dialer::RelayDialer;
use crate::error::DialerError;

/// How a negotiation reaches its relay: dial a relay peer fresh, or reuse an
/// already-established pipe (the onion dialer's chaining case).
pub enum RelayRoute {
    Peer(PeerInfo),
    Pipe(Box<dyn RelayStream>),
}

/// Flat relay dialer.
///
/// Owns the relay-peer registry. The registry is fed by peer lifecycle
/// events (via [`CircuitDialer::spawn_event_task`]) and by successful relay
/// dials; lookups never touch the network.
pub struct CircuitDialer<T: Transport> {
    transport: Arc<T>,
    config: DialerConfig,
    relays: Mutex<HashMap<PeerId, PeerInfo>>,
}

impl<T: Transport> CircuitDialer<T> {
    pub fn new(transport: Arc<T>, config: DialerConfig) -> Self {
        Self {
            transport,
            config,
            relays: Mutex::new(HashMap::new()),
        }
    }

    pub fn local_peer(&self) -> PeerId {
        self.transport.local_peer()
    }

    /// Resolve a peer record from an address, preferring the transport's
    /// known record.
    pub fn resolve_peer(&self, addr: &Multiaddr) -> Option<PeerInfo> {
        peer_from_addr(self.transport.as_ref(), addr)
    }

    /// Registry snapshot in a stable order (sorted by peer id).
    pub fn relays(&self) -> Vec<PeerInfo> {
        let mut list: Vec<PeerInfo> = self.relays.lock().unwrap().values().cloned().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn is_relay(&self, id: &PeerId) -> bool {
        self.relays.lock().unwrap().contains_key(id)
    }

    /// Record a usable relay; merges addresses for relays already known.
    pub fn add_relay(&self, info: PeerInfo) {
        match self.relays.lock().unwrap().entry(info.id.clone()) {
            Entry::Occupied(mut entry) => {
                for addr in info.addrs {
                    entry.get_mut().add_addr(addr);
                }
            }
            Entry::Vacant(entry) => {
                debug!(relay = %info.id, "relay peer registered");
                record_relay_added();
                entry.insert(info);
            }
        }
    }

    pub fn remove_relay(&self, id: &PeerId) {
        if self.relays.lock().unwrap().remove(id).is_some() {
            debug!(relay = %id, "relay peer removed");
            record_relay_removed();
        }
    }

    /// Dial `dst` through `via`, or fail over across every registered relay
    /// when no specific relay is given. A relay is tried at most once per
    /// call; the first success wins.
    pub async fn dial_peer(
        &self,
        dst: &Multiaddr,
        via: Option<PeerInfo>,
    ) -> Result<CircuitConn, DialerError> {
        if let Some(relay) = via {
            return self.negotiate_relay(RelayRoute::Peer(relay), dst).await;
        }

        let candidates = self.relays();
        if candidates.is_empty() {
            return Err(DialerError::NoRelay { attempted: 0 });
        }

        let attempted = candidates.len();
        for relay in candidates {
            let relay_id = relay.id.clone();
            match self.negotiate_relay(RelayRoute::Peer(relay), dst).await {
                Ok(conn) => return Ok(conn),
                Err(err) => {
                    debug!(relay = %relay_id, error = %err, "relay candidate failed");
                    record_dial_failover();
                }
            }
        }
        Err(DialerError::NoRelay { attempted })
    }

    /// Negotiate one circuit over `route`: send `HOP { src: self, dst }`,
    /// await the relay's verdict, and hand back the released raw stream on
    /// success.
    pub async fn negotiate_relay(
        &self,
        route: RelayRoute,
        dst: &Multiaddr,
    ) -> Result<CircuitConn, DialerError> {
        let dst_info = self
            .resolve_peer(dst)
            .ok_or_else(|| DialerError::InvalidAddress(dst.to_string()))?;

        let stream = match route {
            RelayRoute::Pipe(stream) => stream,
            RelayRoute::Peer(relay) => self.dial_relay(&relay).await?,
        };

        debug!(dst = %dst_info.id, "negotiating relay circuit");
        let mut sh = FramedStream::new(
            stream,
            self.config.handshake_timeout(),
            self.config.max_frame_bytes,
        );
        let request = CircuitRelay::hop(self.local_wire_peer(), dst_info.to_wire());
        sh.write_frame(&request.encoded()).await?;

        let frame = sh.read_frame().await?;
        let reply = CircuitRelay::decode(&frame)?;
        match (reply.msg_type, reply.code) {
            (MessageType::Status, Some(Status::Success)) => {
                record_negotiation("success");
                Ok(CircuitConn::new(Box::new(sh.release()), dst_info))
            }
            (MessageType::Status, Some(code)) => {
                let err = DialerError::from_status(code);
                record_negotiation(match err {
                    DialerError::DestinationUnreachable(_) => "unreachable",
                    _ => "refused",
                });
                Err(err)
            }
            (other, _) => {
                record_negotiation("protocol");
                Err(DialerError::UnexpectedReply(other))
            }
        }
    }

    /// Open a fresh stream to a relay over the circuit protocol and record
    /// the relay as reachable.
    pub async fn dial_relay(&self, relay: &PeerInfo) -> Result<Box<dyn RelayStream>, DialerError> {
        let stream = self.transport.dial(relay, PROTOCOL_ID).await?;
        self.add_relay(relay.clone());
        Ok(Box::new(stream))
    }

    /// Probe `relay` with `CAN_HOP` and record it on success. No real
    /// traffic is routed; peers already registered are not re-probed.
    pub async fn can_hop(&self, relay: &PeerInfo) -> Result<(), DialerError> {
        if self.is_relay(&relay.id) {
            return Ok(());
        }

        let stream = self.transport.dial(relay, PROTOCOL_ID).await?;
        let mut sh = FramedStream::new(
            stream,
            self.config.handshake_timeout(),
            self.config.max_frame_bytes,
        );
        sh.write_frame(&CircuitRelay::can_hop().encoded()).await?;

        let frame = sh.read_frame().await?;
        let reply = CircuitRelay::decode(&frame)?;
        match (reply.msg_type, reply.code) {
            (MessageType::Status, Some(Status::Success)) => {
                debug!(relay = %relay.id, "relay capability confirmed");
                self.add_relay(relay.clone());
                Ok(())
            }
            (MessageType::Status, Some(code)) => Err(DialerError::from_status(code)),
            (other, _) => Err(DialerError::UnexpectedReply(other)),
        }
    }

    /// Keep the registry in sync with peer lifecycle events: probe peers as
    /// they connect, drop relays whose connections close.
    pub fn spawn_event_task(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let dialer = self;
        let mut events = dialer.transport.peer_events();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => break,

                    event = events.recv() => match event {
                        Ok(PeerEvent::Established(info)) => {
                            if !dialer.config.probe_on_connect {
                                continue;
                            }
                            if let Err(err) = dialer.can_hop(&info).await {
                                debug!(peer = %info.id, error = %err, "peer is not a usable relay");
                            }
                        }
                        Ok(PeerEvent::Closed(id)) => dialer.remove_relay(&id),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "peer event stream lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    fn local_wire_peer(&self) -> WirePeer {
        PeerInfo::with_addrs(self.transport.local_peer(), self.transport.local_addrs()).to_wire()
    }
}

#[async_trait]
impl<T: Transport> RelayDialer for CircuitDialer<T> {
    /// Flat dial: the address names the destination only; relays come from
    /// the registry. Chained addresses belong to the onion dialer.
    async fn dial(&self, addr: &Multiaddr) -> Result<CircuitConn, DialerError> {
        if addr.split_circuit().len() > 1 {
            return Err(DialerError::InvalidAddress(format!(
                "{addr} is a chained address"
            )));
        }
        self.dial_peer(addr, None).await
    }
}
