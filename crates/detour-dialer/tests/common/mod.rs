//! In-memory mesh transport and node harness for end-to-end circuit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{duplex, DuplexStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use detour_core::addr::Multiaddr;
use detour_core::peer::{PeerId, PeerInfo};
use detour_core::transport::{InboundStream, PeerEvent, Transport, TransportError};
use detour_core::PROTOCOL_ID;
use detour_relay::{Listener, RelayConfig, RelayedConn};

struct Node {
    info: PeerInfo,
    protocols: HashMap<String, mpsc::Sender<InboundStream<DuplexStream>>>,
}

/// A full mesh of in-memory peers: every joined node can stream to every
/// other, protocol registration routes inbound streams.
pub struct MemoryMesh {
    nodes: Mutex<HashMap<PeerId, Node>>,
    connected: Mutex<HashSet<(PeerId, PeerId)>>,
}

impl MemoryMesh {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            nodes: Mutex::new(HashMap::new()),
            connected: Mutex::new(HashSet::new()),
        })
    }

    pub fn join(self: &Arc<Self>, label: &str) -> Arc<MemoryTransport> {
        let id = PeerId::from_bytes(label.as_bytes().to_vec());
        let info = PeerInfo::with_addrs(
            id.clone(),
            vec![Multiaddr::from(format!("/mem/{label}/p2p/{id}"))],
        );
        self.nodes.lock().unwrap().insert(
            id,
            Node {
                info: info.clone(),
                protocols: HashMap::new(),
            },
        );
        let (events, _) = broadcast::channel(16);
        Arc::new(MemoryTransport {
            mesh: Arc::clone(self),
            local: info,
            events,
            dials: Mutex::new(Vec::new()),
        })
    }

    pub fn has_protocol(&self, id: &PeerId, protocol: &str) -> bool {
        self.nodes
            .lock()
            .unwrap()
            .get(id)
            .is_some_and(|node| node.protocols.contains_key(protocol))
    }

    fn pair(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
        if a <= b {
            (a.clone(), b.clone())
        } else {
            (b.clone(), a.clone())
        }
    }
}

/// One peer's view of the mesh.
pub struct MemoryTransport {
    mesh: Arc<MemoryMesh>,
    local: PeerInfo,
    events: broadcast::Sender<PeerEvent>,
    dials: Mutex<Vec<PeerId>>,
}

impl MemoryTransport {
    pub fn info(&self) -> PeerInfo {
        self.local.clone()
    }

    pub fn dialed(&self) -> Vec<PeerId> {
        self.dials.lock().unwrap().clone()
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Stream = DuplexStream;

    fn local_peer(&self) -> PeerId {
        self.local.id.clone()
    }

    fn local_addrs(&self) -> Vec<Multiaddr> {
        self.local.addrs.clone()
    }

    async fn dial(&self, peer: &PeerInfo, protocol: &str) -> Result<DuplexStream, TransportError> {
        self.dials.lock().unwrap().push(peer.id.clone());
        let sender = self
            .mesh
            .nodes
            .lock()
            .unwrap()
            .get(&peer.id)
            .and_then(|node| node.protocols.get(protocol).cloned())
            .ok_or_else(|| TransportError::Unreachable(peer.id.clone()))?;

        let (near, far) = duplex(65536);
        sender
            .send(InboundStream {
                stream: far,
                remote: Some(self.local.clone()),
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        self.mesh
            .connected
            .lock()
            .unwrap()
            .insert(MemoryMesh::pair(&self.local.id, &peer.id));
        Ok(near)
    }

    async fn handle(
        &self,
        protocol: &str,
    ) -> Result<mpsc::Receiver<InboundStream<DuplexStream>>, TransportError> {
        let (tx, rx) = mpsc::channel(32);
        self.mesh
            .nodes
            .lock()
            .unwrap()
            .get_mut(&self.local.id)
            .ok_or(TransportError::Closed)?
            .protocols
            .insert(protocol.to_owned(), tx);
        Ok(rx)
    }

    async fn unhandle(&self, protocol: &str) {
        if let Some(node) = self.mesh.nodes.lock().unwrap().get_mut(&self.local.id) {
            node.protocols.remove(protocol);
        }
    }

    fn is_peer_connected(&self, peer: &PeerId) -> bool {
        self.mesh
            .connected
            .lock()
            .unwrap()
            .contains(&MemoryMesh::pair(&self.local.id, peer))
    }

    fn known_peer(&self, peer: &PeerId) -> Option<PeerInfo> {
        self.mesh
            .nodes
            .lock()
            .unwrap()
            .get(peer)
            .map(|node| node.info.clone())
    }

    fn peer_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }
}

/// A running node: transport + circuit listener, with delivered circuits
/// either handed to the test (`conns`) or pumped back into protocol dispatch
/// (what a real host's protocol negotiation does on a chained relay).
pub struct RelayNode {
    pub transport: Arc<MemoryTransport>,
    pub listener: Arc<Listener<MemoryTransport>>,
    pub conns: Option<mpsc::Receiver<RelayedConn>>,
    pub shutdown: CancellationToken,
}

pub async fn start_node(
    mesh: &Arc<MemoryMesh>,
    label: &str,
    config: RelayConfig,
    chain_relay: bool,
) -> RelayNode {
    let transport = mesh.join(label);
    let (conn_tx, conn_rx) = mpsc::channel(8);
    let listener = Listener::new(Arc::clone(&transport), config, conn_tx);
    let shutdown = CancellationToken::new();
    tokio::spawn(Arc::clone(&listener).run(shutdown.clone()));

    // Wait for protocol registration before anyone dials this node.
    let id = transport.local_peer();
    for _ in 0..500 {
        if mesh.has_protocol(&id, PROTOCOL_ID) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let conns = if chain_relay {
        let listener = Arc::clone(&listener);
        let mut conn_rx = conn_rx;
        tokio::spawn(async move {
            while let Some(conn) = conn_rx.recv().await {
                let listener = Arc::clone(&listener);
                let source = conn.source.clone();
                tokio::spawn(async move {
                    let _ = listener.dispatch(conn.stream, Some(source)).await;
                });
            }
        });
        None
    } else {
        Some(conn_rx)
    };

    RelayNode {
        transport,
        listener,
        conns,
        shutdown,
    }
}

pub fn relay_config() -> RelayConfig {
    RelayConfig {
        enabled: true,
        active: true,
        ..RelayConfig::default()
    }
}
