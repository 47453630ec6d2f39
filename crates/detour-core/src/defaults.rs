//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

/// Default handshake timeout in seconds. Every framed read or write during a
/// negotiation is bounded by this.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 60;

/// Default maximum length of a single message frame payload.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024;

/// Default maximum length of a single address inside a peer record.
pub const DEFAULT_MAX_ADDR_BYTES: usize = 1024;

/// Default idle timeout for a spliced circuit in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default splice buffer size per direction.
pub const DEFAULT_SPLICE_BUFFER_SIZE: usize = 32768;

/// Default capacity of the inbound stream channel handed out by transports.
pub const DEFAULT_INBOUND_CHANNEL_CAPACITY: usize = 32;
