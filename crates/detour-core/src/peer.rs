//! Peer identity and peer records.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::addr::Multiaddr;
use crate::transport::Transport;

/// An opaque peer identifier.
///
/// The relay layer never interprets identity bytes; it only compares them and
/// renders them as hex where an address needs a `/p2p/<id>` suffix.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Bytes);

impl PeerId {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        hex::decode(s).ok().map(|raw| Self(Bytes::from(raw)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl Serialize for PeerId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PeerId::from_hex(&s).ok_or_else(|| serde::de::Error::custom("peer id is not hex"))
    }
}

/// A dialable peer record: identity plus the addresses it may be reached on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addrs: Vec<Multiaddr>,
}

impl PeerInfo {
    pub fn new(id: PeerId) -> Self {
        Self {
            id,
            addrs: Vec::new(),
        }
    }

    pub fn with_addrs(id: PeerId, addrs: Vec<Multiaddr>) -> Self {
        Self { id, addrs }
    }

    /// Add an address if not already recorded.
    pub fn add_addr(&mut self, addr: Multiaddr) {
        if !self.addrs.contains(&addr) {
            self.addrs.push(addr);
        }
    }

    /// Convert to the wire representation.
    pub fn to_wire(&self) -> detour_proto::Peer {
        detour_proto::Peer::new(
            self.id.to_bytes(),
            self.addrs.iter().map(|a| a.to_string()).collect(),
        )
    }

    /// Build from the wire representation without validation.
    pub fn from_wire(peer: &detour_proto::Peer) -> Self {
        Self {
            id: PeerId::from_bytes(peer.id.clone()),
            addrs: peer.addrs.iter().map(|a| Multiaddr::from(a.as_str())).collect(),
        }
    }
}

/// Resolve a peer record from an address, preferring whatever the transport
/// already knows about the peer over a freshly synthesized record.
///
/// Returns `None` when the address carries no peer id.
pub fn peer_from_addr<T: Transport>(transport: &T, addr: &Multiaddr) -> Option<PeerInfo> {
    let id = addr.peer_id()?;
    let mut info = transport
        .known_peer(&id)
        .unwrap_or_else(|| PeerInfo::new(id));
    info.add_addr(addr.clone());
    Some(info)
}
