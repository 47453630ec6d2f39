//! The narrow transport interface the relay logic is written against.
//!
//! The real swarm — socket dialing, security, muxing, protocol negotiation —
//! lives outside this repository. Everything the circuit relay needs from it
//! is captured here: open a stream to a peer for a protocol, receive inbound
//! streams for a protocol, answer reachability queries, and surface peer
//! lifecycle events.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};

use crate::addr::Multiaddr;
use crate::peer::{PeerId, PeerInfo};

/// Errors surfaced by a transport implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to dial {peer}: {reason}")]
    Dial { peer: PeerId, reason: String },
    #[error("no route to peer {0}")]
    Unreachable(PeerId),
    #[error("protocol {0} already has a handler")]
    AlreadyRegistered(String),
    #[error("transport closed")]
    Closed,
}

/// An inbound stream delivered to a protocol handler, together with the
/// identity of the connection it arrived on (when the transport knows it).
#[derive(Debug)]
pub struct InboundStream<S> {
    pub stream: S,
    pub remote: Option<PeerInfo>,
}

/// Peer connection lifecycle events.
///
/// `Established` fires when a multiplexed connection to a peer comes up,
/// `Closed` when it goes away. The dial side uses these to maintain its relay
/// registry.
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Established(PeerInfo),
    Closed(PeerId),
}

/// The collaborator interface consumed by the relay and dialer components.
///
/// Implementations must be thread-safe; negotiations run concurrently across
/// independent streams.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Stream type produced for both dialed and inbound connections.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// This node's identity.
    fn local_peer(&self) -> PeerId;

    /// The addresses this node is reachable on directly.
    fn local_addrs(&self) -> Vec<Multiaddr>;

    /// Open a new stream to `peer` speaking `protocol`.
    async fn dial(&self, peer: &PeerInfo, protocol: &str) -> Result<Self::Stream, TransportError>;

    /// Register interest in `protocol`; inbound streams arrive on the
    /// returned channel until [`Transport::unhandle`] is called.
    async fn handle(
        &self,
        protocol: &str,
    ) -> Result<mpsc::Receiver<InboundStream<Self::Stream>>, TransportError>;

    /// Remove the handler for `protocol`.
    async fn unhandle(&self, protocol: &str);

    /// True if a live (direct or multiplexed) connection to `peer` exists.
    fn is_peer_connected(&self, peer: &PeerId) -> bool;

    /// Look up the known record for `peer`, if any.
    fn known_peer(&self, peer: &PeerId) -> Option<PeerInfo>;

    /// Subscribe to peer lifecycle events.
    fn peer_events(&self) -> broadcast::Receiver<PeerEvent>;
}

/// Forwarding impl so components can hold `Arc<T>` and hand it out freely.
#[async_trait]
impl<T: Transport> Transport for Arc<T> {
    type Stream = T::Stream;

    fn local_peer(&self) -> PeerId {
        (**self).local_peer()
    }

    fn local_addrs(&self) -> Vec<Multiaddr> {
        (**self).local_addrs()
    }

    async fn dial(&self, peer: &PeerInfo, protocol: &str) -> Result<Self::Stream, TransportError> {
        (**self).dial(peer, protocol).await
    }

    async fn handle(
        &self,
        protocol: &str,
    ) -> Result<mpsc::Receiver<InboundStream<Self::Stream>>, TransportError> {
        (**self).handle(protocol).await
    }

    async fn unhandle(&self, protocol: &str) {
        (**self).unhandle(protocol).await;
    }

    fn is_peer_connected(&self, peer: &PeerId) -> bool {
        (**self).is_peer_connected(peer)
    }

    fn known_peer(&self, peer: &PeerId) -> Option<PeerInfo> {
        (**self).known_peer(peer)
    }

    fn peer_events(&self) -> broadcast::Receiver<PeerEvent> {
        (**self).peer_events()
    }
}
