//! Onion dialing: chain a circuit through a sequence of relays.
//!
//! A chained address names its hops with the circuit marker:
//! `<relay-1>/p2p-circuit/<relay-2>/p2p-circuit/<destination>`. Hops are
//! negotiated strictly in order, and the pipe obtained at hop *i* is the
//! transport for the negotiation at hop *i+1*, so the final connection nests
//! one relayed stream inside another, onion style.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use detour_core::addr::Multiaddr;
use detour_core::transport::Transport;

use crate::circuit::{CircuitDialer, RelayRoute};
use crate::conn::CircuitConn;
use crate::dialer::RelayDialer;
use crate::error::DialerError;

/// Multi-hop dialing strategy over a [`CircuitDialer`].
pub struct OnionDialer<T: Transport> {
    inner: Arc<CircuitDialer<T>>,
}

impl<T: Transport> OnionDialer<T> {
    pub fn new(inner: Arc<CircuitDialer<T>>) -> Self {
        Self { inner }
    }

    /// The flat dialer this strategy negotiates with.
    pub fn dialer(&self) -> &Arc<CircuitDialer<T>> {
        &self.inner
    }

    /// Walk the hop segments in order. Any failure aborts the whole chain
    /// with the first error; partially built hops are dropped, not retried.
    async fn onion_dial(&self, segments: Vec<Multiaddr>) -> Result<CircuitConn, DialerError> {
        let total = segments.len();
        let mut iter = segments.into_iter();
        let first = iter
            .next()
            .ok_or_else(|| DialerError::InvalidAddress("empty circuit address".into()))?;

        // A single segment names only the destination: fall back to flat
        // relay selection over the registry.
        let Some(second) = iter.next() else {
            return self.inner.dial_peer(&first, None).await;
        };

        debug!(hops = total - 1, "onion dialing through relay chain");
        let first_relay = self
            .inner
            .resolve_peer(&first)
            .ok_or_else(|| DialerError::InvalidAddress(first.to_string()))?;
        let mut conn = self
            .inner
            .negotiate_relay(RelayRoute::Peer(first_relay), &second)
            .await?;

        // Each established pipe carries the next negotiation.
        for next in iter {
            conn = self
                .inner
                .negotiate_relay(RelayRoute::Pipe(conn.stream), &next)
                .await?;
        }
        Ok(conn)
    }
}

#[async_trait]
impl<T: Transport> RelayDialer for OnionDialer<T> {
    async fn dial(&self, addr: &Multiaddr) -> Result<CircuitConn, DialerError> {
        let segments = addr.split_circuit();
        let Some(last) = segments.last() else {
            return Err(DialerError::InvalidAddress(addr.to_string()));
        };
        if last.peer_id() == Some(self.inner.local_peer()) {
            return Err(DialerError::SelfDial);
        }
        self.onion_dial(segments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DialerConfig;
    use crate::testutil::{relay_script, MockTransport};
    use detour_core::peer::PeerId;
    use detour_proto::{MessageType, Status};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn onion(transport: &Arc<MockTransport>) -> OnionDialer<MockTransport> {
        OnionDialer::new(Arc::new(CircuitDialer::new(
            Arc::clone(transport),
            DialerConfig::default(),
        )))
    }

    fn pid(label: &str) -> PeerId {
        PeerId::from_bytes(label.as_bytes().to_vec())
    }

    fn chained(labels: &[&str]) -> Multiaddr {
        let segments: Vec<String> = labels.iter().map(|l| format!("/p2p/{}", pid(l))).collect();
        Multiaddr::from(segments.join("/p2p-circuit"))
    }

    #[tokio::test]
    async fn two_hop_chain_negotiates_in_order_over_one_dial() {
        let transport = MockTransport::new("source");
        let dialer = onion(&transport);

        // One physical stream to relay-1; both negotiations travel over it.
        let seen = transport.script_dial(
            &pid("relay-1"),
            relay_script(vec![Status::Success, Status::Success]),
        );

        let mut conn = dialer
            .dial(&chained(&["relay-1", "relay-2", "dest"]))
            .await
            .unwrap();
        assert_eq!(conn.peer.id, pid("dest"));

        // Hop order: relay-2 negotiated first, then the destination, and
        // only relay-1 was ever dialed directly.
        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].msg_type, MessageType::Hop);
        assert_eq!(
            requests[0].dst_peer.as_ref().unwrap().id,
            pid("relay-2").to_bytes()
        );
        assert_eq!(
            requests[1].dst_peer.as_ref().unwrap().id,
            pid("dest").to_bytes()
        );
        assert_eq!(transport.dialed_peers(), vec![pid("relay-1")]);
        drop(requests);

        // The chained pipe carries payload (scripted echo).
        conn.write_all(b"nested").await.unwrap();
        conn.shutdown().await.unwrap();
        let mut out = Vec::new();
        conn.read_to_end(&mut out).await.unwrap();
        assert_eq!(out, b"nested");
    }

    #[tokio::test]
    async fn single_hop_chain_uses_the_named_relay() {
        let transport = MockTransport::new("source");
        let dialer = onion(&transport);

        let seen = transport.script_dial(&pid("relay-1"), relay_script(vec![Status::Success]));
        let conn = dialer.dial(&chained(&["relay-1", "dest"])).await.unwrap();
        assert_eq!(conn.peer.id, pid("dest"));

        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].dst_peer.as_ref().unwrap().id,
            pid("dest").to_bytes()
        );
    }

    #[tokio::test]
    async fn dial_to_self_is_rejected_before_any_dial() {
        let transport = MockTransport::new("source");
        let dialer = onion(&transport);

        let err = dialer
            .dial(&chained(&["relay-1", "source"]))
            .await
            .unwrap_err();
        assert!(matches!(err, DialerError::SelfDial));
        assert_eq!(transport.dial_count(), 0);
    }

    #[tokio::test]
    async fn bare_destination_falls_back_to_registry_failover() {
        let transport = MockTransport::new("source");
        let dialer = onion(&transport);

        let err = dialer.dial(&chained(&["dest"])).await.unwrap_err();
        assert!(matches!(err, DialerError::NoRelay { attempted: 0 }));
    }

    #[tokio::test]
    async fn mid_chain_failure_aborts_with_first_error() {
        let transport = MockTransport::new("source");
        let dialer = onion(&transport);

        // relay-1 accepts the first hop, refuses the second.
        transport.script_dial(
            &pid("relay-1"),
            relay_script(vec![Status::Success, Status::HopCantDialDst]),
        );

        let err = dialer
            .dial(&chained(&["relay-1", "relay-2", "dest"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DialerError::DestinationUnreachable(Status::HopCantDialDst)
        ));
    }
}
