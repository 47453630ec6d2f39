//! Test doubles for dial-side tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{broadcast, mpsc};

use detour_core::addr::Multiaddr;
use detour_core::io::FramedStream;
use detour_core::peer::{PeerId, PeerInfo};
use detour_core::transport::{InboundStream, PeerEvent, Transport, TransportError};
use detour_proto::{CircuitRelay, Status};

const TIMEOUT: Duration = Duration::from_secs(5);

/// A canned relay endpoint: answer each framed request with the next status,
/// then echo the raw remainder until EOF.
pub struct RelayScript {
    replies: Vec<Status>,
}

pub fn relay_script(replies: Vec<Status>) -> RelayScript {
    RelayScript { replies }
}

/// Transport double whose dials pop per-peer scripted streams.
pub struct MockTransport {
    local: PeerInfo,
    dial_queue: Mutex<HashMap<PeerId, VecDeque<DuplexStream>>>,
    dials: Mutex<Vec<PeerId>>,
    known: Mutex<HashMap<PeerId, PeerInfo>>,
    events: broadcast::Sender<PeerEvent>,
}

impl MockTransport {
    pub fn new(label: &str) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        let id = PeerId::from_bytes(label.as_bytes().to_vec());
        Arc::new(Self {
            local: PeerInfo::with_addrs(id, vec![Multiaddr::from("/ip4/127.0.0.1/tcp/4001")]),
            dial_queue: Mutex::new(HashMap::new()),
            dials: Mutex::new(Vec::new()),
            known: Mutex::new(HashMap::new()),
            events,
        })
    }

    /// Queue a scripted endpoint for the next dial to `peer`. Returns the
    /// log of requests the script decodes, for call-order assertions.
    pub fn script_dial(
        &self,
        peer: &PeerId,
        script: RelayScript,
    ) -> Arc<Mutex<Vec<CircuitRelay>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (near, far) = duplex(65536);
        let log = Arc::clone(&seen);
        tokio::spawn(async move {
            let mut sh = FramedStream::new(far, TIMEOUT, 4096);
            for reply in script.replies {
                let Ok(frame) = sh.read_frame().await else {
                    return;
                };
                let Ok(msg) = CircuitRelay::decode(&frame) else {
                    return;
                };
                log.lock().unwrap().push(msg);
                let status = CircuitRelay::status(reply).encoded();
                if sh.write_frame(&status).await.is_err() {
                    return;
                }
            }

            // Past the handshake: echo raw bytes until the dialer closes.
            let mut raw = sh.release();
            let mut buf = vec![0u8; 4096];
            loop {
                match raw.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if raw.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = raw.shutdown().await;
        });

        self.dial_queue
            .lock()
            .unwrap()
            .entry(peer.clone())
            .or_default()
            .push_back(near);
        seen
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
        self.dial_queue
            .lock()
            .unwrap()
            .get_mut(&peer.id)
            .and_then(VecDeque::pop_front)
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

    fn is_peer_connected(&self, _peer: &PeerId) -> bool {
        false
    }

    fn known_peer(&self, peer: &PeerId) -> Option<PeerInfo> {
        self.known.lock().unwrap().get(peer).cloned()
    }

    fn peer_events(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }
}

/// Poll `cond` until it holds, panicking after a few seconds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
