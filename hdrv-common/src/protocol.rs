//! # Control-Call Frames
//!
//! Purpose: Define the fixed byte layouts exchanged over the control-call
//! channel, both the request payloads and the response frame.
//!
//! ## Design Principles
//!
//! 1. **Header + Payload**: Every response starts with a 4-byte header so the
//!    host can validate magic, version and command before reading the body.
//! 2. **Big-Endian Integers**: Length and count fields are `u32` big-endian.
//! 3. **All-or-Nothing Writes**: The full frame length is computed before the
//!    first byte is written; an undersized output area is rejected untouched.
//! 4. **Borrowing Decoders**: Request decoders return slices into the input
//!    buffer, so nothing outlives the call.
//!
//! ## Memory Layout
//!
//! ```text
//! ResponseHeader (4 bytes total):
//! +--------+---------+----------+----------+
//! | magic  | version | command  | status   |
//! +--------+---------+----------+----------+
//! | 1B     | 1B      | 1B       | 1B       |
//! +--------+---------+----------+----------+
//! status = 0 (ok) or an ErrorTag code; on error the body is UTF-8 detail.
//!
//! Argument vector (COMMAND, APPEND):
//! +----------+-----------+-----------+-----+
//! | argc:4B  | len:4B    | bytes     | ... |
//! +----------+-----------+-----------+-----+
//!
//! ConnectRequest:
//! +--------------+-------------------------+
//! | timeout:4B   | address (UTF-8, rest)   |
//! +--------------+-------------------------+
//!
//! StatusReport (9 bytes total):
//! +----------+------------+-------------+
//! | state:1B | pending:4B | outbound:4B |
//! +----------+------------+-------------+
//! ```

use bytes::{Buf, BufMut};

use crate::control::{CallCommand, CALL_MAGIC};
use crate::error::{CallError, CallResult};
use crate::taxonomy::ErrorTag;

/// Protocol version for host/driver compatibility checks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Status byte indicating success.
pub const STATUS_OK: u8 = 0;

/// Size of the response header in bytes.
pub const HEADER_LEN: usize = 4;

/// Size of an encoded `StatusReport`.
pub const STATUS_REPORT_LEN: usize = 9;

/// Lifecycle phase of a connection handle, as reported over the wire.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    Created = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
}

impl LinkState {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Created),
            1 => Some(Self::Connecting),
            2 => Some(Self::Open),
            3 => Some(Self::Closing),
            4 => Some(Self::Closed),
            _ => None,
        }
    }

    /// True once the socket has been (or is being) torn down.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

/// Header prepended to every response frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseHeader {
    /// Magic number to validate the frame.
    pub magic: u8,
    /// Protocol version for compatibility checks.
    pub version: u8,
    /// Command number the response answers.
    pub command: u8,
    /// `STATUS_OK` or an `ErrorTag` code.
    pub status: u8,
}

impl ResponseHeader {
    /// Builds a header for the provided command and status.
    pub const fn new(command: CallCommand, status: u8) -> Self {
        ResponseHeader {
            magic: CALL_MAGIC,
            version: PROTOCOL_VERSION,
            command: command.as_u8(),
            status,
        }
    }

    pub const fn to_bytes(self) -> [u8; HEADER_LEN] {
        [self.magic, self.version, self.command, self.status]
    }
}

/// Result of executing a control call, before it is framed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok(Vec<u8>),
    Err(ErrorTag, String),
}

impl Outcome {
    pub fn empty() -> Self {
        Outcome::Ok(Vec::new())
    }

    pub fn error(tag: ErrorTag, detail: impl Into<String>) -> Self {
        Outcome::Err(tag, detail.into())
    }

    fn status(&self) -> u8 {
        match self {
            Outcome::Ok(_) => STATUS_OK,
            Outcome::Err(tag, _) => tag.code(),
        }
    }

    fn body(&self) -> &[u8] {
        match self {
            Outcome::Ok(body) => body,
            Outcome::Err(_, detail) => detail.as_bytes(),
        }
    }

    /// Total framed length.
    pub fn frame_len(&self) -> usize {
        HEADER_LEN + self.body().len()
    }
}

/// Writes a complete response frame into `out`.
///
/// Returns the exact number of bytes written. When `out` is too small, no
/// byte is written and `InsufficientCapacity` is returned.
pub fn write_response(out: &mut [u8], command: CallCommand, outcome: &Outcome) -> CallResult<usize> {
    let needed = outcome.frame_len();
    if needed > out.len() {
        return Err(CallError::InsufficientCapacity {
            needed,
            available: out.len(),
        });
    }

    let header = ResponseHeader::new(command, outcome.status()).to_bytes();
    out[..HEADER_LEN].copy_from_slice(&header);
    out[HEADER_LEN..needed].copy_from_slice(outcome.body());
    Ok(needed)
}

/// Decoded view of a response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response<'a> {
    pub header: ResponseHeader,
    pub body: Result<&'a [u8], (ErrorTag, &'a str)>,
}

/// Parses a response frame produced by `write_response`.
pub fn read_response(frame: &[u8]) -> CallResult<Response<'_>> {
    if frame.len() < HEADER_LEN {
        return Err(CallError::BadArgument("short response frame"));
    }
    let header = ResponseHeader {
        magic: frame[0],
        version: frame[1],
        command: frame[2],
        status: frame[3],
    };
    if header.magic != CALL_MAGIC || header.version != PROTOCOL_VERSION {
        return Err(CallError::BadArgument("response magic/version mismatch"));
    }

    let body = &frame[HEADER_LEN..];
    if header.status == STATUS_OK {
        return Ok(Response { header, body: Ok(body) });
    }
    let tag = ErrorTag::from_code(header.status).ok_or(CallError::BadArgument("unknown status"))?;
    let detail = std::str::from_utf8(body).map_err(|_| CallError::BadArgument("detail is not utf-8"))?;
    Ok(Response {
        header,
        body: Err((tag, detail)),
    })
}

/// Encodes an argument vector request payload.
pub fn encode_args(args: &[&[u8]], out: &mut Vec<u8>) {
    out.put_u32(args.len() as u32);
    for arg in args {
        out.put_u32(arg.len() as u32);
        out.extend_from_slice(arg);
    }
}

/// Decodes an argument vector request payload.
///
/// The whole input must be consumed and at least one argument is required.
pub fn decode_args(input: &[u8]) -> CallResult<Vec<&[u8]>> {
    let mut buf = input;
    if buf.remaining() < 4 {
        return Err(CallError::BadArgument("missing argument count"));
    }
    let argc = buf.get_u32() as usize;
    if argc == 0 {
        return Err(CallError::BadArgument("empty command"));
    }
    // Every argument needs at least its length prefix.
    if argc > buf.remaining() / 4 {
        return Err(CallError::BadArgument("argument count exceeds payload"));
    }

    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        if buf.remaining() < 4 {
            return Err(CallError::BadArgument("truncated argument length"));
        }
        let len = buf.get_u32() as usize;
        if buf.remaining() < len {
            return Err(CallError::BadArgument("truncated argument"));
        }
        args.push(&buf[..len]);
        buf.advance(len);
    }
    if buf.has_remaining() {
        return Err(CallError::BadArgument("trailing bytes after arguments"));
    }
    Ok(args)
}

/// Encodes a connect request payload.
pub fn encode_connect(timeout_ms: u32, addr: &str, out: &mut Vec<u8>) {
    out.put_u32(timeout_ms);
    out.extend_from_slice(addr.as_bytes());
}

/// Decodes a connect request payload into `(timeout_ms, address)`.
pub fn decode_connect(input: &[u8]) -> CallResult<(u32, &str)> {
    let mut buf = input;
    if buf.remaining() < 4 {
        return Err(CallError::BadArgument("missing connect timeout"));
    }
    let timeout_ms = buf.get_u32();
    let addr = std::str::from_utf8(buf).map_err(|_| CallError::BadArgument("address is not utf-8"))?;
    if addr.is_empty() {
        return Err(CallError::BadArgument("missing address"));
    }
    Ok((timeout_ms, addr))
}

/// Decodes a timeout request payload.
pub fn decode_timeout(input: &[u8]) -> CallResult<u32> {
    let mut buf = input;
    if buf.remaining() != 4 {
        return Err(CallError::BadArgument("timeout payload must be 4 bytes"));
    }
    Ok(buf.get_u32())
}

/// Snapshot returned by the STATUS command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusReport {
    pub state: LinkState,
    /// Async requests still waiting for a reply.
    pub pending: u32,
    /// Bytes queued but not yet written to the socket.
    pub outbound: u32,
}

impl StatusReport {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(STATUS_REPORT_LEN);
        out.put_u8(self.state.as_u8());
        out.put_u32(self.pending);
        out.put_u32(self.outbound);
        out
    }

    pub fn decode(body: &[u8]) -> CallResult<Self> {
        let mut buf = body;
        if buf.remaining() != STATUS_REPORT_LEN {
            return Err(CallError::BadArgument("status report length"));
        }
        let state = LinkState::from_u8(buf.get_u8()).ok_or(CallError::BadArgument("unknown state"))?;
        Ok(StatusReport {
            state,
            pending: buf.get_u32(),
            outbound: buf.get_u32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_four_bytes() {
        assert_eq!(std::mem::size_of::<ResponseHeader>(), HEADER_LEN);
        let header = ResponseHeader::new(CallCommand::Status, STATUS_OK);
        assert_eq!(header.to_bytes(), [b'R', PROTOCOL_VERSION, 3, 0]);
    }

    #[test]
    fn decodes_argument_vector() {
        let mut payload = Vec::new();
        encode_args(&[b"SET", b"key", b""], &mut payload);
        let args = decode_args(&payload).unwrap();
        assert_eq!(args, vec![&b"SET"[..], &b"key"[..], &b""[..]]);
    }

    #[test]
    fn rejects_malformed_argument_vectors() {
        assert!(decode_args(&[]).is_err());
        assert!(decode_args(&[0, 0, 0, 0]).is_err());
        // Claims one argument of 10 bytes, carries 2.
        assert!(decode_args(&[0, 0, 0, 1, 0, 0, 0, 10, b'a', b'b']).is_err());
        // Huge argc with a tiny payload.
        assert!(decode_args(&[0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]).is_err());

        let mut payload = Vec::new();
        encode_args(&[b"PING"], &mut payload);
        payload.push(0);
        assert_eq!(
            decode_args(&payload),
            Err(CallError::BadArgument("trailing bytes after arguments"))
        );
    }

    #[test]
    fn decodes_connect_request() {
        let mut payload = Vec::new();
        encode_connect(250, "127.0.0.1:6379", &mut payload);
        assert_eq!(decode_connect(&payload).unwrap(), (250, "127.0.0.1:6379"));
        assert!(decode_connect(&[0, 0, 0, 1]).is_err());
        assert!(decode_connect(&[0, 0]).is_err());
    }

    #[test]
    fn undersized_output_is_left_untouched() {
        let outcome = Outcome::Ok(b"payload".to_vec());
        let mut out = [0xAAu8; 6];
        let err = write_response(&mut out, CallCommand::Command, &outcome).unwrap_err();
        assert_eq!(err, CallError::InsufficientCapacity { needed: 11, available: 6 });
        assert_eq!(out, [0xAA; 6]);
    }

    #[test]
    fn error_frames_carry_tag_and_detail() {
        let outcome = Outcome::error(ErrorTag::Reply, "ERR wrong type");
        let mut out = [0u8; 64];
        let len = write_response(&mut out, CallCommand::Command, &outcome).unwrap();
        let response = read_response(&out[..len]).unwrap();
        assert_eq!(response.header.command, CallCommand::Command.as_u8());
        assert_eq!(response.body, Err((ErrorTag::Reply, "ERR wrong type")));
    }

    #[test]
    fn status_report_layout() {
        let report = StatusReport {
            state: LinkState::Open,
            pending: 3,
            outbound: 17,
        };
        let bytes = report.encode();
        assert_eq!(bytes, vec![2, 0, 0, 0, 3, 0, 0, 0, 17]);
        assert_eq!(StatusReport::decode(&bytes).unwrap(), report);
    }

    #[test]
    fn terminal_states() {
        assert!(LinkState::Closed.is_terminal());
        assert!(LinkState::Closing.is_terminal());
        assert!(!LinkState::Open.is_terminal());
    }
}
