//! CircuitRelay wire message parsing and serialization.
//!
//! A circuit negotiation exchanges exactly one message shape: `CircuitRelay`,
//! carrying a message type, optional source/destination peer records and an
//! optional status code. Each message travels as a single varint
//! length-prefixed frame; framing itself lives with the stream handler, this
//! crate only encodes and decodes frame payloads.
//!
//! The payload layout is deterministic and symmetric (`decode(encode(m)) == m`
//! for every valid `m`):
//!
//! ```text
//! u8      type      1=HOP 2=STOP 3=STATUS 4=CAN_HOP (other values decode to Unknown)
//! u8      flags     bit0 src_peer, bit1 dst_peer, bit2 code
//! [peer]  src_peer  if flags bit0
//! [peer]  dst_peer  if flags bit1
//! varint  code      if flags bit2
//!
//! peer := varint id_len, id bytes, varint addr_count, { varint addr_len, addr utf-8 }*
//! ```

pub mod varint;

use bytes::{BufMut, Bytes, BytesMut};

pub use varint::{read_uvarint, write_uvarint};

/// Maximum length of a message frame payload unless configured otherwise.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024;

const FLAG_SRC_PEER: u8 = 0b0000_0001;
const FLAG_DST_PEER: u8 = 0b0000_0010;
const FLAG_CODE: u8 = 0b0000_0100;

/// Errors produced when decoding a message payload.
///
/// These are protocol violations, deliberately distinct from I/O errors so a
/// dispatcher can answer `INVALID_MSG_TYPE` instead of dropping the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("message truncated")]
    Truncated,
    #[error("{0} trailing bytes after message")]
    TrailingBytes(usize),
    #[error("varint length header out of range")]
    VarintOverflow,
    #[error("address is not valid utf-8")]
    InvalidUtf8,
    #[error("unknown status code {0}")]
    UnknownStatus(u32),
}

/// Message type discriminant.
///
/// Unknown values decode into [`MessageType::Unknown`] rather than failing, so
/// a dispatcher can switch on them defensively and reply with
/// [`Status::InvalidMsgType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Hop,
    Stop,
    Status,
    CanHop,
    Unknown(u8),
}

impl MessageType {
    pub fn code(self) -> u8 {
        match self {
            MessageType::Hop => 1,
            MessageType::Stop => 2,
            MessageType::Status => 3,
            MessageType::CanHop => 4,
            MessageType::Unknown(v) => v,
        }
    }

    pub fn from_code(code: u8) -> Self {
        match code {
            1 => MessageType::Hop,
            2 => MessageType::Stop,
            3 => MessageType::Status,
            4 => MessageType::CanHop,
            other => MessageType::Unknown(other),
        }
    }
}

/// Status vocabulary carried by `STATUS` replies.
///
/// The numbering is part of the wire contract: 1xx success, 2xx hop-side
/// failures, 3xx stop-side failures, 400 for unrecognized messages. No code is
/// reused across groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    HopSrcAddrTooLong,
    HopDstAddrTooLong,
    HopSrcMultiaddrInvalid,
    HopDstMultiaddrInvalid,
    HopNoConnToDst,
    HopCantDialDst,
    HopCantOpenDstStream,
    HopCantSpeakRelay,
    HopCantConnectToSelf,
    HopCantRelayToSelf,
    HopMsgTooLong,
    StopSrcAddrTooLong,
    StopDstAddrTooLong,
    StopSrcMultiaddrInvalid,
    StopDstMultiaddrInvalid,
    InvalidMsgType,
}

impl Status {
    pub fn code(self) -> u32 {
        match self {
            Status::Success => 100,
            Status::HopSrcAddrTooLong => 220,
            Status::HopDstAddrTooLong => 221,
            Status::HopSrcMultiaddrInvalid => 250,
            Status::HopDstMultiaddrInvalid => 251,
            Status::HopNoConnToDst => 260,
            Status::HopCantDialDst => 261,
            Status::HopCantOpenDstStream => 262,
            Status::HopCantSpeakRelay => 270,
            Status::HopCantConnectToSelf => 280,
            Status::HopCantRelayToSelf => 281,
            Status::HopMsgTooLong => 290,
            Status::StopSrcAddrTooLong => 320,
            Status::StopDstAddrTooLong => 321,
            Status::StopSrcMultiaddrInvalid => 350,
            Status::StopDstMultiaddrInvalid => 351,
            Status::InvalidMsgType => 400,
        }
    }

    /// The status vocabulary is closed; unknown codes are a decode error.
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            100 => Status::Success,
            220 => Status::HopSrcAddrTooLong,
            221 => Status::HopDstAddrTooLong,
            250 => Status::HopSrcMultiaddrInvalid,
            251 => Status::HopDstMultiaddrInvalid,
            260 => Status::HopNoConnToDst,
            261 => Status::HopCantDialDst,
            262 => Status::HopCantOpenDstStream,
            270 => Status::HopCantSpeakRelay,
            280 => Status::HopCantConnectToSelf,
            281 => Status::HopCantRelayToSelf,
            290 => Status::HopMsgTooLong,
            320 => Status::StopSrcAddrTooLong,
            321 => Status::StopDstAddrTooLong,
            350 => Status::StopSrcMultiaddrInvalid,
            351 => Status::StopDstMultiaddrInvalid,
            400 => Status::InvalidMsgType,
            _ => return None,
        })
    }

    pub fn is_success(self) -> bool {
        self == Status::Success
    }

    /// Snake-case label for metrics and logs.
    pub fn class(self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::HopSrcAddrTooLong => "hop_src_addr_too_long",
            Status::HopDstAddrTooLong => "hop_dst_addr_too_long",
            Status::HopSrcMultiaddrInvalid => "hop_src_multiaddr_invalid",
            Status::HopDstMultiaddrInvalid => "hop_dst_multiaddr_invalid",
            Status::HopNoConnToDst => "hop_no_conn_to_dst",
            Status::HopCantDialDst => "hop_cant_dial_dst",
            Status::HopCantOpenDstStream => "hop_cant_open_dst_stream",
            Status::HopCantSpeakRelay => "hop_cant_speak_relay",
            Status::HopCantConnectToSelf => "hop_cant_connect_to_self",
            Status::HopCantRelayToSelf => "hop_cant_relay_to_self",
            Status::HopMsgTooLong => "hop_msg_too_long",
            Status::StopSrcAddrTooLong => "stop_src_addr_too_long",
            Status::StopDstAddrTooLong => "stop_dst_addr_too_long",
            Status::StopSrcMultiaddrInvalid => "stop_src_multiaddr_invalid",
            Status::StopDstMultiaddrInvalid => "stop_dst_multiaddr_invalid",
            Status::InvalidMsgType => "invalid_msg_type",
        }
    }
}

/// A peer record on the wire: opaque identity plus dialable address strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Peer {
    pub id: Bytes,
    pub addrs: Vec<String>,
}

impl Peer {
    pub fn new(id: impl Into<Bytes>, addrs: Vec<String>) -> Self {
        Self {
            id: id.into(),
            addrs,
        }
    }

    fn encode(&self, buf: &mut BytesMut) {
        write_uvarint(buf, self.id.len() as u64);
        buf.put_slice(&self.id);
        write_uvarint(buf, self.addrs.len() as u64);
        for addr in &self.addrs {
            write_uvarint(buf, addr.len() as u64);
            buf.put_slice(addr.as_bytes());
        }
    }
}

/// The one wire entity of the circuit relay protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitRelay {
    pub msg_type: MessageType,
    pub src_peer: Option<Peer>,
    pub dst_peer: Option<Peer>,
    pub code: Option<Status>,
}

impl CircuitRelay {
    /// A HOP request: ask a relay to forward to `dst`.
    pub fn hop(src: Peer, dst: Peer) -> Self {
        Self {
            msg_type: MessageType::Hop,
            src_peer: Some(src),
            dst_peer: Some(dst),
            code: None,
        }
    }

    /// A STOP request: announce an inbound relayed circuit to the destination.
    pub fn stop(src: Peer, dst: Peer) -> Self {
        Self {
            msg_type: MessageType::Stop,
            src_peer: Some(src),
            dst_peer: Some(dst),
            code: None,
        }
    }

    /// A STATUS reply carrying `code`.
    pub fn status(code: Status) -> Self {
        Self {
            msg_type: MessageType::Status,
            src_peer: None,
            dst_peer: None,
            code: Some(code),
        }
    }

    /// A CAN_HOP capability probe. Carries no peers and no code.
    pub fn can_hop() -> Self {
        Self {
            msg_type: MessageType::CanHop,
            src_peer: None,
            dst_peer: None,
            code: None,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.msg_type.code());

        let mut flags = 0u8;
        if self.src_peer.is_some() {
            flags |= FLAG_SRC_PEER;
        }
        if self.dst_peer.is_some() {
            flags |= FLAG_DST_PEER;
        }
        if self.code.is_some() {
            flags |= FLAG_CODE;
        }
        buf.put_u8(flags);

        if let Some(src) = &self.src_peer {
            src.encode(buf);
        }
        if let Some(dst) = &self.dst_peer {
            dst.encode(buf);
        }
        if let Some(code) = self.code {
            write_uvarint(buf, u64::from(code.code()));
        }
    }

    /// Encode into a fresh buffer.
    pub fn encoded(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode one complete frame payload. Rejects trailing bytes.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(buf);
        let msg_type = MessageType::from_code(r.u8()?);
        let flags = r.u8()?;

        let src_peer = if flags & FLAG_SRC_PEER != 0 {
            Some(r.peer()?)
        } else {
            None
        };
        let dst_peer = if flags & FLAG_DST_PEER != 0 {
            Some(r.peer()?)
        } else {
            None
        };
        let code = if flags & FLAG_CODE != 0 {
            let raw = r.uvarint()?;
            let raw = u32::try_from(raw).map_err(|_| DecodeError::UnknownStatus(u32::MAX))?;
            Some(Status::from_code(raw).ok_or(DecodeError::UnknownStatus(raw))?)
        } else {
            None
        };

        let left = r.remaining();
        if left != 0 {
            return Err(DecodeError::TrailingBytes(left));
        }

        Ok(Self {
            msg_type,
            src_peer,
            dst_peer,
            code,
        })
    }
}

/// Cursor over a frame payload.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self.buf.get(self.pos).ok_or(DecodeError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn uvarint(&mut self) -> Result<u64, DecodeError> {
        let (value, consumed) = read_uvarint(&self.buf[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn length(&mut self) -> Result<usize, DecodeError> {
        let raw = self.uvarint()?;
        // An inner length can never exceed what is physically present.
        if raw > self.remaining() as u64 {
            return Err(DecodeError::Truncated);
        }
        Ok(raw as usize)
    }

    fn peer(&mut self) -> Result<Peer, DecodeError> {
        let id_len = self.length()?;
        let id = Bytes::copy_from_slice(self.bytes(id_len)?);

        let addr_count = self.uvarint()?;
        let mut addrs = Vec::with_capacity(addr_count.min(16) as usize);
        for _ in 0..addr_count {
            let len = self.length()?;
            let raw = self.bytes(len)?;
            let addr = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidUtf8)?;
            addrs.push(addr.to_owned());
        }

        Ok(Peer { id, addrs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, addrs: &[&str]) -> Peer {
        Peer::new(
            Bytes::copy_from_slice(id.as_bytes()),
            addrs.iter().map(|a| (*a).to_owned()).collect(),
        )
    }

    fn roundtrip(msg: &CircuitRelay) -> CircuitRelay {
        CircuitRelay::decode(&msg.encoded()).unwrap()
    }

    #[test]
    fn hop_roundtrip() {
        let msg = CircuitRelay::hop(
            peer("alpha", &["/ip4/10.0.0.1/tcp/4001/p2p/616c706861"]),
            peer("beta", &["/ip4/10.0.0.2/tcp/4001", "/dns4/beta.example/tcp/443"]),
        );
        assert_eq!(roundtrip(&msg), msg);
    }

    #[test]
    fn stop_roundtrip() {
        let msg = CircuitRelay::stop(peer("alpha", &["/ip4/10.0.0.1/tcp/4001"]), peer("beta", &[]));
        assert_eq!(roundtrip(&msg), msg);
        assert_eq!(msg.msg_type, MessageType::Stop);
    }

    #[test]
    fn status_roundtrip_all_codes() {
        let codes = [
            Status::Success,
            Status::HopSrcAddrTooLong,
            Status::HopDstAddrTooLong,
            Status::HopSrcMultiaddrInvalid,
            Status::HopDstMultiaddrInvalid,
            Status::HopNoConnToDst,
            Status::HopCantDialDst,
            Status::HopCantOpenDstStream,
            Status::HopCantSpeakRelay,
            Status::HopCantConnectToSelf,
            Status::HopCantRelayToSelf,
            Status::HopMsgTooLong,
            Status::StopSrcAddrTooLong,
            Status::StopDstAddrTooLong,
            Status::StopSrcMultiaddrInvalid,
            Status::StopDstMultiaddrInvalid,
            Status::InvalidMsgType,
        ];
        for code in codes {
            let msg = CircuitRelay::status(code);
            assert_eq!(roundtrip(&msg), msg);
            assert_eq!(Status::from_code(code.code()), Some(code));
        }
    }

    #[test]
    fn can_hop_roundtrip() {
        let msg = CircuitRelay::can_hop();
        let back = roundtrip(&msg);
        assert_eq!(back, msg);
        assert!(back.src_peer.is_none());
        assert!(back.dst_peer.is_none());
        assert!(back.code.is_none());
    }

    #[test]
    fn unknown_type_decodes_defensively() {
        let mut msg = CircuitRelay::can_hop();
        msg.msg_type = MessageType::Unknown(9);
        let back = roundtrip(&msg);
        assert_eq!(back.msg_type, MessageType::Unknown(9));
    }

    #[test]
    fn unknown_status_code_is_rejected() {
        // Hand-build a STATUS frame with code 999.
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Status.code());
        buf.put_u8(FLAG_CODE);
        write_uvarint(&mut buf, 999);
        assert_eq!(
            CircuitRelay::decode(&buf),
            Err(DecodeError::UnknownStatus(999))
        );
    }

    #[test]
    fn truncated_inputs_are_rejected() {
        let msg = CircuitRelay::hop(peer("alpha", &["/ip4/1.2.3.4/tcp/1"]), peer("beta", &[]));
        let encoded = msg.encoded();
        for cut in 0..encoded.len() {
            let res = CircuitRelay::decode(&encoded[..cut]);
            assert_eq!(res, Err(DecodeError::Truncated), "cut at {cut}");
        }
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut raw = CircuitRelay::status(Status::Success).encoded().to_vec();
        raw.push(0);
        assert_eq!(
            CircuitRelay::decode(&raw),
            Err(DecodeError::TrailingBytes(1))
        );
    }

    #[test]
    fn non_utf8_address_is_rejected() {
        // peer with a single 2-byte addr of invalid utf-8
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Stop.code());
        buf.put_u8(FLAG_SRC_PEER);
        write_uvarint(&mut buf, 1); // id len
        buf.put_u8(b'x');
        write_uvarint(&mut buf, 1); // one addr
        write_uvarint(&mut buf, 2);
        buf.put_slice(&[0xff, 0xfe]);
        assert_eq!(CircuitRelay::decode(&buf), Err(DecodeError::InvalidUtf8));
    }

    #[test]
    fn inner_length_cannot_exceed_payload() {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Hop.code());
        buf.put_u8(FLAG_SRC_PEER);
        write_uvarint(&mut buf, 1 << 20); // absurd id length
        buf.put_u8(b'x');
        assert_eq!(CircuitRelay::decode(&buf), Err(DecodeError::Truncated));
    }
}
