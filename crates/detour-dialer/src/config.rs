//! Dial-side configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use detour_core::defaults;

/// Configuration for relay dialing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialerConfig {
    /// Bound on every framed read/write during negotiation (seconds).
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,

    /// Maximum length of a single message frame payload.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Probe newly connected peers with `CAN_HOP` to discover relays
    /// passively.
    #[serde(default = "default_probe_on_connect")]
    pub probe_on_connect: bool,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_secs: default_handshake_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
            probe_on_connect: default_probe_on_connect(),
        }
    }
}

impl DialerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

fn default_handshake_timeout() -> u64 {
    defaults::DEFAULT_HANDSHAKE_TIMEOUT_SECS
}
fn default_max_frame_bytes() -> usize {
    defaults::DEFAULT_MAX_FRAME_BYTES
}
fn default_probe_on_connect() -> bool {
    true
}
