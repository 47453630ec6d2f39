//! Error class constants for metrics and logging.
//!
//! These provide consistent error classification across all crates.

/// I/O error on an underlying stream.
pub const ERROR_IO: &str = "io";
/// Protocol parsing/validation error.
pub const ERROR_PROTOCOL: &str = "protocol";
/// Handshake or splice timeout.
pub const ERROR_TIMEOUT: &str = "timeout";
/// Transport-layer dial or registration error.
pub const ERROR_TRANSPORT: &str = "transport";
/// A peer answered with a non-success status.
pub const ERROR_STATUS: &str = "status";
/// Configuration error.
pub const ERROR_CONFIG: &str = "config";
