//! Relay-side configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use detour_core::addr::Multiaddr;
use detour_core::defaults;

/// Configuration for the relay listener and its handlers.
///
/// Relaying defaults to off: a node that merely *uses* relays runs the
/// listener only for STOP requests and refuses to hop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Answer HOP requests at all. When false, every hop attempt is refused
    /// with `HOP_CANT_SPEAK_RELAY`.
    #[serde(default)]
    pub enabled: bool,

    /// Active relay mode: dial destinations this node has no live connection
    /// to. Passive relays (the default) require the destination to already be
    /// connected.
    #[serde(default)]
    pub active: bool,

    /// Maximum length of a single message frame payload.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Maximum length of one address inside a peer record.
    #[serde(default = "default_max_addr_bytes")]
    pub max_addr_bytes: usize,

    /// Bound on every framed read/write during negotiation (seconds).
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Spliced circuits are torn down after this long without traffic
    /// (seconds).
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Copy buffer size per splice direction.
    #[serde(default = "default_splice_buffer_size")]
    pub splice_buffer_size: usize,

    /// Relay addresses to advertise instead of the transport's direct
    /// addresses when computing this node's circuit addresses.
    #[serde(default)]
    pub advertised_relays: Vec<Multiaddr>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            active: false,
            max_frame_bytes: default_max_frame_bytes(),
            max_addr_bytes: default_max_addr_bytes(),
            handshake_timeout_secs: default_handshake_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            splice_buffer_size: default_splice_buffer_size(),
            advertised_relays: Vec::new(),
        }
    }
}

impl RelayConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

fn default_max_frame_bytes() -> usize {
    defaults::DEFAULT_MAX_FRAME_BYTES
}
fn default_max_addr_bytes() -> usize {
    defaults::DEFAULT_MAX_ADDR_BYTES
}
fn default_handshake_timeout() -> u64 {
    defaults::DEFAULT_HANDSHAKE_TIMEOUT_SECS
}
fn default_idle_timeout() -> u64 {
    defaults::DEFAULT_IDLE_TIMEOUT_SECS
}
fn default_splice_buffer_size() -> usize {
    defaults::DEFAULT_SPLICE_BUFFER_SIZE
}
