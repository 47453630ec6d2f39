//! I/O primitives for circuit negotiation and relaying.
//!
//! - [`FramedStream`]: length-prefixed request/response framing with a
//!   bounded handshake timeout, releasable into the raw remainder stream.
//! - [`PrefixedStream`]: replays buffered leftover bytes before the inner
//!   stream, so nothing read past the last frame is lost on release.
//! - [`splice_bidirectional`]: wires two released streams into one circuit.

mod framed;
mod prefixed;
mod splice;

pub use framed::{FrameError, FramedStream};
pub use prefixed::PrefixedStream;
pub use splice::{splice_bidirectional, NoOpMetrics, SpliceMetrics};
