//! Shared helpers for the relay-side handlers.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use detour_core::io::{FrameError, FramedStream};
use detour_core::peer::{PeerId, PeerInfo};
use detour_core::RelayStream;
use detour_proto::{CircuitRelay, Peer as WirePeer, Status};

/// Encode and write one `STATUS` reply.
pub async fn write_status<S>(sh: &mut FramedStream<S>, status: Status) -> Result<(), FrameError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    sh.write_frame(&CircuitRelay::status(status).encoded()).await
}

/// Which peer record of which handler is being validated; picks the status
/// codes reported on failure.
#[derive(Debug, Clone, Copy)]
pub enum AddrSide {
    HopSrc,
    HopDst,
    StopSrc,
}

impl AddrSide {
    pub fn invalid(self) -> Status {
        match self {
            AddrSide::HopSrc => Status::HopSrcMultiaddrInvalid,
            AddrSide::HopDst => Status::HopDstMultiaddrInvalid,
            AddrSide::StopSrc => Status::StopSrcMultiaddrInvalid,
        }
    }

    pub fn too_long(self) -> Status {
        match self {
            AddrSide::HopSrc => Status::HopSrcAddrTooLong,
            AddrSide::HopDst => Status::HopDstAddrTooLong,
            AddrSide::StopSrc => Status::StopSrcAddrTooLong,
        }
    }
}

/// Validate a wire peer record into a usable [`PeerInfo`].
///
/// Returns the status code to answer with on failure. Oversize addresses are
/// reported distinctly from malformed ones.
pub fn validate_peer(
    peer: Option<&WirePeer>,
    max_addr_bytes: usize,
    side: AddrSide,
) -> Result<PeerInfo, Status> {
    let peer = peer.ok_or_else(|| side.invalid())?;
    if peer.id.is_empty() {
        return Err(side.invalid());
    }

    let mut info = PeerInfo::new(PeerId::from_bytes(peer.id.clone()));
    for addr in &peer.addrs {
        if addr.len() > max_addr_bytes {
            return Err(side.too_long());
        }
        let addr = detour_core::Multiaddr::from(addr.as_str());
        if !addr.is_wellformed() {
            return Err(side.invalid());
        }
        info.add_addr(addr);
    }
    Ok(info)
}

/// Close a source that must not be spliced: best-effort shutdown of the raw
/// remainder so the peer sees EOF instead of a hang.
pub async fn shutdown_source<S: RelayStream>(sh: FramedStream<S>) {
    let mut raw = sh.release();
    if let Err(err) = raw.shutdown().await {
        debug!(error = %err, "source shutdown failed");
    }
}
