//! Test doubles shared by the handler tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::DuplexStream;
use tokio::sync::{broadcast, mpsc};

use detour_core::addr::Multiaddr;
use detour_core::io::FramedStream;
use detour_core::peer::{PeerId, PeerInfo};
use detour_core::transport::{InboundStream, PeerEvent, Transport, TransportError};
use detour_proto::{CircuitRelay, MessageType, Peer as WirePeer, Status};

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn wire_peer(label: &str, addrs: &[&str]) -> WirePeer {
    WirePeer::new(
        Bytes::copy_from_slice(label.as_bytes()),
        addrs.iter().map(|a| (*a).to_owned()).collect(),
    )
}

/// Read one frame off `stream` and expect it to be a STATUS message.
pub async fn read_status_frame(stream: DuplexStream) -> Status {
    let mut sh = FramedStream::new(stream, TIMEOUT, 1024);
    let frame = sh.read_frame().await.unwrap();
    let msg = CircuitRelay::decode(&frame).unwrap();
    assert_eq!(msg.msg_type, MessageType::Status);
    msg.code.unwrap()
}

/// Scriptable transport double. Dials pop queued streams (or fail when the
/// queue is empty) and are recorded for call assertions.
pub struct MockTransport {
    local: PeerInfo,
    connected: Mutex<HashSet<PeerId>>,
    known: Mutex<HashMap<PeerId, PeerInfo>>,
    dial_results: Mutex<VecDeque<DuplexStream>>,
    dials: Mutex<Vec<PeerId>>,
    events: broadcast::Sender<PeerEvent>,
}

impl MockTransport {
    pub fn new(label: &str) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        let id = PeerId::from_bytes(label.as_bytes().to_vec());
        Arc::new(Self {
            local: PeerInfo::with_addrs(id, vec![Multiaddr::from("/ip4/127.0.0.1/tcp/4001")]),
            connected: Mutex::new(HashSet::new()),
            known: Mutex::new(HashMap::new()),
            dial_results: Mutex::new(VecDeque::new()),
            dials: Mutex::new(Vec::new()),
            events,
        })
    }

    /// Queue the stream the next dial returns.
    pub fn expect_dial(&self, stream: DuplexStream) {
        self.dial_results.lock().unwrap().push_back(stream);
    }

    pub fn mark_connected(&self, id: PeerId) {
        self.connected.lock().unwrap().insert(id);
    }

    pub fn add_known(&self, info: PeerInfo) {
        self.known.lock().unwrap().insert(info.id.clone(), info);
    }

    pub fn dial_count(&self) -> usize {
        self.dials.lock().unwrap().len()
    }

    pub fn dialed_peers(&self) -> Vec<PeerId> {
        self.dials.lock().unwrap().clone()
    }

    pub fn emit(&self, event: PeerEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Stream = DuplexStream;

    fn local_peer(&self) -> PeerId {
        self.local.id.clone()
    }

    fn local_addrs(&self) -> Vec<Multiaddr> {
        self.local.addrs.clone()
    }

    async fn dial(&self, peer: &PeerInfo, _protocol: &str) -> Result<DuplexStream, TransportError> {
        self.dials.lock().unwrap().push(peer.id.clone());
        self.dial_results
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError::Unreachable(peer.id.clone()))
    }

    async fn handle(
        &self,
        _protocol: &str,
    ) -> Result<mpsc::Receiver<InboundStream<DuplexStream>>, TransportError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn unhandle(&self, _protocol: &str) {}

    fn is_peer_connected(&self, peer: &PeerId) -> bool {
        self.connected.lock().unwrap().contains(peer)
    }

    fn known_peer(&self, peer: &PeerId) -> Option<PeerInfo> {
        self.known.lock().unwrap().get(peer).cloned()
    }

    fn peer_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }
}
