//! Multi-segment peer addresses.
//!
//! Addresses are `/`-separated paths (`/ip4/10.0.0.1/tcp/4001/p2p/<id>`).
//! The relay layer treats them as opaque strings except for three concerns:
//! extracting the trailing `/p2p/<id>` identity, splitting a chained address
//! on the circuit marker, and building advertised circuit addresses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::peer::PeerId;

/// The address segment separating hops in a chained circuit address.
pub const CIRCUIT_MARKER: &str = "p2p-circuit";

/// A multi-segment address string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Multiaddr(String);

impl Multiaddr {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A bare identity address: `/p2p/<hex-id>`.
    pub fn from_peer(id: &PeerId) -> Self {
        Self(format!("/p2p/{id}"))
    }

    /// Minimal structural validity: leading slash, no empty segments.
    pub fn is_wellformed(&self) -> bool {
        let s = self.0.as_str();
        if !s.starts_with('/') || s.len() < 2 {
            return false;
        }
        !s[1..].split('/').any(str::is_empty)
    }

    /// The identity named by the last `/p2p/<id>` segment pair, if any.
    pub fn peer_id(&self) -> Option<PeerId> {
        let segs: Vec<&str> = self.0.split('/').filter(|s| !s.is_empty()).collect();
        let mut found = None;
        let mut i = 0;
        while i + 1 < segs.len() {
            if segs[i] == "p2p" {
                found = Some(segs[i + 1]);
                i += 2;
            } else {
                i += 1;
            }
        }
        found.and_then(PeerId::from_hex)
    }

    /// Append a segment path, normalizing the joining slash.
    pub fn encapsulate(&self, segment: &str) -> Self {
        let tail = segment.trim_start_matches('/');
        Self(format!("{}/{}", self.0.trim_end_matches('/'), tail))
    }

    /// Split a chained address on the circuit marker into ordered hop
    /// segments. Empty pieces (leading marker, doubled markers) are dropped.
    pub fn split_circuit(&self) -> Vec<Multiaddr> {
        let mut out = Vec::new();
        let mut current = String::new();
        for seg in self.0.split('/').filter(|s| !s.is_empty()) {
            if seg == CIRCUIT_MARKER {
                if !current.is_empty() {
                    out.push(Multiaddr(std::mem::take(&mut current)));
                }
            } else {
                current.push('/');
                current.push_str(seg);
            }
        }
        if !current.is_empty() {
            out.push(Multiaddr(current));
        }
        out
    }

    /// True if the address names at least one relay hop.
    pub fn is_circuit(&self) -> bool {
        self.0.split('/').any(|seg| seg == CIRCUIT_MARKER)
    }

    /// Wrap this address as a circuit address terminating at `id`:
    /// `<self>/p2p-circuit/p2p/<id>`. This is what a node advertises so
    /// others can reach it through a relay.
    pub fn circuit_through(&self, id: &PeerId) -> Self {
        Self(format!(
            "{}/{}/p2p/{id}",
            self.0.trim_end_matches('/'),
            CIRCUIT_MARKER
        ))
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Multiaddr {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Multiaddr {
    fn from(s: String) -> Self {
        Self(s)
    }
}
