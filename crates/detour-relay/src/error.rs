//! Relay-side error types.

use detour_core::errors::{
    ERROR_IO, ERROR_PROTOCOL, ERROR_STATUS, ERROR_TIMEOUT, ERROR_TRANSPORT,
};
use detour_core::io::FrameError;
use detour_core::transport::TransportError;
use detour_proto::{DecodeError, MessageType, Status};

/// Errors from handling one inbound relay stream.
///
/// Every failure that still had a writable stream has already been answered
/// with a `STATUS` reply by the time this surfaces; the listener only logs
/// and counts it.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    /// The request was refused and `STATUS({0})` sent to the requester.
    #[error("request rejected: {}", .0.class())]
    Rejected(Status),
    /// The destination answered the forwarded STOP with a non-success code.
    #[error("destination refused circuit: {}", .0.class())]
    DestinationRefused(Status),
    #[error("unexpected message type {0:?} on relay stream")]
    UnexpectedType(MessageType),
    #[error("relayed connection has no consumer")]
    Delivery,
}

impl RelayError {
    /// Error class string for metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayError::Io(_) => ERROR_IO,
            RelayError::Frame(FrameError::Timeout) => ERROR_TIMEOUT,
            RelayError::Frame(FrameError::Io(_)) | RelayError::Frame(FrameError::Eof) => ERROR_IO,
            RelayError::Frame(_) => ERROR_PROTOCOL,
            RelayError::Decode(_) | RelayError::UnexpectedType(_) => ERROR_PROTOCOL,
            RelayError::Transport(_) | RelayError::Delivery => ERROR_TRANSPORT,
            RelayError::Rejected(_) | RelayError::DestinationRefused(_) => ERROR_STATUS,
        }
    }

    /// The status code attached to this error, if any.
    pub fn status(&self) -> Option<Status> {
        match self {
            RelayError::Rejected(s) | RelayError::DestinationRefused(s) => Some(*s),
            _ => None,
        }
    }
}
