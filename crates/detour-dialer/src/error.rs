//! Dial-side error types.

use detour_core::errors::{
    ERROR_IO, ERROR_PROTOCOL, ERROR_STATUS, ERROR_TIMEOUT, ERROR_TRANSPORT,
};
use detour_core::io::FrameError;
use detour_core::transport::TransportError;
use detour_proto::{DecodeError, MessageType, Status};

/// Errors from dialing over relays.
///
/// The three user-visible failure families stay distinguishable: no relay was
/// available at all, the relay refused to serve us, or the relay could not
/// reach the destination.
#[derive(Debug, thiserror::Error)]
pub enum DialerError {
    #[error("no relay peers were found or all relays failed to dial ({attempted} tried)")]
    NoRelay { attempted: usize },
    #[error("cannot dial over a relay to self")]
    SelfDial,
    #[error("invalid circuit address: {0}")]
    InvalidAddress(String),
    /// The relay answered the negotiation with a refusal.
    #[error("relay refused circuit: {}", .0.class())]
    RelayRefused(Status),
    /// The relay accepted but could not complete the circuit to the
    /// destination.
    #[error("destination unreachable via relay: {}", .0.class())]
    DestinationUnreachable(Status),
    #[error("unexpected reply of type {0:?} during negotiation")]
    UnexpectedReply(MessageType),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
}

impl DialerError {
    /// Partition a non-success negotiation status into the two remote
    /// failure families.
    pub fn from_status(status: Status) -> Self {
        match status {
            Status::HopNoConnToDst | Status::HopCantDialDst | Status::HopCantOpenDstStream => {
                DialerError::DestinationUnreachable(status)
            }
            other => DialerError::RelayRefused(other),
        }
    }

    /// The status code attached to this error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            DialerError::RelayRefused(s) | DialerError::DestinationUnreachable(s) => Some(*s),
            _ => None,
        }
    }

    /// Error class string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            DialerError::Frame(FrameError::Timeout) => ERROR_TIMEOUT,
            DialerError::Frame(FrameError::Io(_)) | DialerError::Frame(FrameError::Eof) => ERROR_IO,
            DialerError::Frame(_) => ERROR_PROTOCOL,
            DialerError::Decode(_) | DialerError::UnexpectedReply(_) => ERROR_PROTOCOL,
            DialerError::Transport(_) | DialerError::NoRelay { .. } => ERROR_TRANSPORT,
            DialerError::RelayRefused(_) | DialerError::DestinationUnreachable(_) => ERROR_STATUS,
            DialerError::SelfDial | DialerError::InvalidAddress(_) => ERROR_PROTOCOL,
        }
    }
}
