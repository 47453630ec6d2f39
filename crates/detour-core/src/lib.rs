//! Core types and I/O primitives shared across detour crates.
//!
//! This crate provides:
//! - The peer and address model (opaque peer ids, circuit-aware addresses)
//! - The narrow transport interface the relay logic is written against
//! - Framed stream handling, leftover replay and bidirectional splicing
//! - Default configuration values and error-class constants

pub mod addr;
pub mod defaults;
pub mod errors;
pub mod io;
pub mod peer;
pub mod transport;

pub use addr::{Multiaddr, CIRCUIT_MARKER};
pub use peer::{peer_from_addr, PeerId, PeerInfo};
pub use transport::{InboundStream, PeerEvent, Transport, TransportError};

use tokio::io::{AsyncRead, AsyncWrite};

/// Protocol id registered with the transport's negotiation layer. One id
/// covers hop, stop, status and capability probes.
pub const PROTOCOL_ID: &str = "/detour/circuit/1.0.0";

/// Marker trait for streams the relay machinery can carry.
pub trait RelayStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> RelayStream for T {}
