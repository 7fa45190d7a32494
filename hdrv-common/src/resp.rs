//! # RESP Encoding and Incremental Parsing
//!
//! Purpose: Encode commands and decode replies from a growing, non-blocking
//! read buffer. A value is only consumed once it is complete, so partial
//! reads simply wait for more bytes. Replies are RESP2; the RESP3 push
//! frame (`>`) is also accepted so out-of-band data can be told apart from
//! replies.
//!
//! ## Design Principles
//! 1. **Peek, Then Consume**: Parsing walks the buffer by offset and advances
//!    it only after a whole value decoded.
//! 2. **Buffer Reuse**: The caller owns the `BytesMut`; the parser is stateless.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use std::fmt;

use bytes::{Buf, BytesMut};

use crate::error::{RespError, RespResult};

/// Largest bulk string accepted (matches the Redis default).
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Longest header line accepted before the stream is declared garbled.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Deepest array nesting accepted.
pub const MAX_DEPTH: usize = 32;

/// RESP value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style responses.
    Simple(Vec<u8>),
    /// -ERR ... responses.
    Error(Vec<u8>),
    /// :123 responses.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays, with None for null.
    Array(Option<Vec<RespValue>>),
    /// >... out-of-band push; never a reply to a request.
    Push(Vec<RespValue>),
}

impl RespValue {
    /// Appends the wire encoding of this value to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            RespValue::Simple(text) => push_line(out, b'+', text),
            RespValue::Error(text) => push_line(out, b'-', text),
            RespValue::Integer(value) => push_line(out, b':', value.to_string().as_bytes()),
            RespValue::Bulk(None) => out.extend_from_slice(b"$-1\r\n"),
            RespValue::Bulk(Some(data)) => {
                push_line(out, b'$', data.len().to_string().as_bytes());
                out.extend_from_slice(data);
                out.extend_from_slice(b"\r\n");
            }
            RespValue::Array(None) => out.extend_from_slice(b"*-1\r\n"),
            RespValue::Array(Some(items)) => {
                push_line(out, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
            RespValue::Push(items) => {
                push_line(out, b'>', items.len().to_string().as_bytes());
                for item in items {
                    item.encode(out);
                }
            }
        }
    }

    /// Returns the encoded bytes as a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    pub fn is_push(&self) -> bool {
        matches!(self, RespValue::Push(_))
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::Simple(text) => write!(f, "{}", String::from_utf8_lossy(text)),
            RespValue::Error(text) => write!(f, "(error) {}", String::from_utf8_lossy(text)),
            RespValue::Integer(value) => write!(f, "(integer) {}", value),
            RespValue::Bulk(None) | RespValue::Array(None) => f.write_str("(nil)"),
            RespValue::Bulk(Some(data)) => write!(f, "{:?}", String::from_utf8_lossy(data)),
            RespValue::Array(Some(items)) => fmt_items(items, f),
            RespValue::Push(items) => {
                f.write_str("(push) ")?;
                fmt_items(items, f)
            }
        }
    }
}

fn fmt_items(items: &[RespValue], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("[")?;
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", item)?;
    }
    f.write_str("]")
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    push_line(out, b'*', args.len().to_string().as_bytes());
    for arg in args {
        push_line(out, b'$', arg.len().to_string().as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Stateless incremental RESP parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespParser;

impl RespParser {
    pub fn new() -> Self {
        RespParser
    }

    /// Decodes one value from the front of `buf`.
    ///
    /// Returns `Ok(None)` when more bytes are needed; the buffer is left as-is.
    /// On success the consumed bytes are removed from `buf`.
    pub fn parse(&mut self, buf: &mut BytesMut) -> RespResult<Option<RespValue>> {
        match parse_at(&buf[..], 0, 0)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

type Parsed = Option<(RespValue, usize)>;

fn parse_at(buf: &[u8], pos: usize, depth: usize) -> RespResult<Parsed> {
    if depth > MAX_DEPTH {
        return Err(RespError::Protocol("nesting too deep"));
    }
    let Some(&marker) = buf.get(pos) else {
        return Ok(None);
    };
    // Reject garbage before waiting for a line terminator that may never come.
    if !matches!(marker, b'+' | b'-' | b':' | b'$' | b'*' | b'>') {
        return Err(RespError::Protocol("unknown type marker"));
    }
    let Some((line, next)) = read_line(buf, pos + 1)? else {
        return Ok(None);
    };

    match marker {
        b'+' => Ok(Some((RespValue::Simple(line.to_vec()), next))),
        b'-' => Ok(Some((RespValue::Error(line.to_vec()), next))),
        b':' => Ok(Some((RespValue::Integer(parse_i64(line)?), next))),
        b'$' => parse_bulk(buf, parse_i64(line)?, next),
        b'*' => parse_array(buf, parse_i64(line)?, next, depth),
        _ => parse_push(buf, parse_i64(line)?, next, depth),
    }
}

fn parse_bulk(buf: &[u8], len: i64, start: usize) -> RespResult<Parsed> {
    if len == -1 {
        return Ok(Some((RespValue::Bulk(None), start)));
    }
    if !(0..=MAX_BULK_LEN).contains(&len) {
        return Err(RespError::Protocol("invalid bulk length"));
    }
    let end = start + len as usize;
    if buf.len() < end + 2 {
        return Ok(None);
    }
    if &buf[end..end + 2] != b"\r\n" {
        return Err(RespError::Protocol("bulk string missing crlf"));
    }
    Ok(Some((RespValue::Bulk(Some(buf[start..end].to_vec())), end + 2)))
}

fn parse_array(buf: &[u8], len: i64, start: usize, depth: usize) -> RespResult<Parsed> {
    if len == -1 {
        return Ok(Some((RespValue::Array(None), start)));
    }
    if len < 0 {
        return Err(RespError::Protocol("invalid array length"));
    }
    Ok(parse_items(buf, len, start, depth)?.map(|(items, pos)| (RespValue::Array(Some(items)), pos)))
}

fn parse_push(buf: &[u8], len: i64, start: usize, depth: usize) -> RespResult<Parsed> {
    if len < 1 {
        return Err(RespError::Protocol("invalid push length"));
    }
    Ok(parse_items(buf, len, start, depth)?.map(|(items, pos)| (RespValue::Push(items), pos)))
}

fn parse_items(buf: &[u8], len: i64, start: usize, depth: usize) -> RespResult<Option<(Vec<RespValue>, usize)>> {
    // Cap the preallocation; the length is peer-controlled.
    let mut items = Vec::with_capacity((len as usize).min(1024));
    let mut pos = start;
    for _ in 0..len {
        match parse_at(buf, pos, depth + 1)? {
            Some((item, next)) => {
                items.push(item);
                pos = next;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((items, pos)))
}

fn read_line(buf: &[u8], start: usize) -> RespResult<Option<(&[u8], usize)>> {
    let window = &buf[start.min(buf.len())..];
    match window.iter().position(|&b| b == b'\n') {
        Some(idx) => {
            if idx == 0 || window[idx - 1] != b'\r' {
                return Err(RespError::Protocol("line missing crlf"));
            }
            Ok(Some((&window[..idx - 1], start + idx + 1)))
        }
        None if window.len() > MAX_LINE_LEN => Err(RespError::Protocol("line too long")),
        None => Ok(None),
    }
}

fn parse_i64(data: &[u8]) -> RespResult<i64> {
    if data.is_empty() {
        return Err(RespError::Protocol("empty integer"));
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };
    if digits.is_empty() {
        return Err(RespError::Protocol("empty integer"));
    }

    // Accumulate toward the sign so i64::MIN still fits.
    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(RespError::Protocol("invalid integer"));
        }
        let digit = (b - b'0') as i64;
        let next = value.checked_mul(10).and_then(|v| {
            if negative {
                v.checked_sub(digit)
            } else {
                v.checked_add(digit)
            }
        });
        value = next.ok_or(RespError::Protocol("integer out of range"))?;
    }
    Ok(value)
}

fn push_line(out: &mut Vec<u8>, marker: u8, body: &[u8]) {
    out.push(marker);
    out.extend_from_slice(body);
    out.extend_from_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> (Vec<RespValue>, BytesMut) {
        let mut buf = BytesMut::from(input);
        let mut parser = RespParser::new();
        let mut values = Vec::new();
        while let Some(value) = parser.parse(&mut buf).unwrap() {
            values.push(value);
        }
        (values, buf)
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[b"GET", b"key"], &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn parses_simple_string() {
        let (values, rest) = parse_all(b"+OK\r\n");
        assert_eq!(values, vec![RespValue::Simple(b"OK".to_vec())]);
        assert!(rest.is_empty());
    }

    #[test]
    fn parses_null_bulk_string() {
        let (values, _) = parse_all(b"$-1\r\n");
        assert_eq!(values, vec![RespValue::Bulk(None)]);
    }

    #[test]
    fn parses_error_and_integer() {
        let (values, _) = parse_all(b"-ERR bad\r\n:-42\r\n");
        assert_eq!(
            values,
            vec![RespValue::Error(b"ERR bad".to_vec()), RespValue::Integer(-42)]
        );
    }

    #[test]
    fn parses_nested_arrays() {
        let (values, _) = parse_all(b"*2\r\n*1\r\n:1\r\n$3\r\nabc\r\n");
        assert_eq!(
            values,
            vec![RespValue::Array(Some(vec![
                RespValue::Array(Some(vec![RespValue::Integer(1)])),
                RespValue::Bulk(Some(b"abc".to_vec())),
            ]))]
        );
    }

    #[test]
    fn waits_for_partial_values_without_consuming() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"$5\r\nhel"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 7);

        buf.extend_from_slice(b"lo\r\n+PO");
        assert_eq!(
            parser.parse(&mut buf).unwrap(),
            Some(RespValue::Bulk(Some(b"hello".to_vec())))
        );
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
        assert_eq!(&buf[..], b"+PO");
    }

    #[test]
    fn partial_array_is_not_consumed() {
        let mut parser = RespParser::new();
        let mut buf = BytesMut::from(&b"*2\r\n:1\r\n"[..]);
        assert_eq!(parser.parse(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn rejects_garbage() {
        let mut parser = RespParser::new();
        assert!(parser.parse(&mut BytesMut::from(&b"hello\r\n"[..])).is_err());
        assert!(parser.parse(&mut BytesMut::from(&b":12a\r\n"[..])).is_err());
        assert!(parser.parse(&mut BytesMut::from(&b"$3\r\nabcXY"[..])).is_err());
        assert!(parser.parse(&mut BytesMut::from(&b"+OK\n"[..])).is_err());
        assert!(parser.parse(&mut BytesMut::from(&b"$-5\r\n"[..])).is_err());
    }

    #[test]
    fn parses_push_frames() {
        let (values, rest) = parse_all(b">2\r\n$7\r\nmessage\r\n$2\r\nhi\r\n:1\r\n");
        assert_eq!(
            values,
            vec![
                RespValue::Push(vec![
                    RespValue::Bulk(Some(b"message".to_vec())),
                    RespValue::Bulk(Some(b"hi".to_vec())),
                ]),
                RespValue::Integer(1),
            ]
        );
        assert!(values[0].is_push());
        assert!(rest.is_empty());

        let mut parser = RespParser::new();
        assert!(parser.parse(&mut BytesMut::from(&b">0\r\n"[..])).is_err());
        assert!(parser.parse(&mut BytesMut::from(&b">-1\r\n"[..])).is_err());
    }

    #[test]
    fn out_of_range_integers_are_rejected() {
        let mut parser = RespParser::new();
        assert_eq!(
            parser.parse(&mut BytesMut::from(&b":9223372036854775808\r\n"[..])),
            Err(RespError::Protocol("integer out of range"))
        );
        assert_eq!(
            parser.parse(&mut BytesMut::from(&b"$99999999999999999999\r\n"[..])),
            Err(RespError::Protocol("integer out of range"))
        );
        assert_eq!(
            parser.parse(&mut BytesMut::from(&b":-9223372036854775808\r\n"[..])).unwrap(),
            Some(RespValue::Integer(i64::MIN))
        );
        assert_eq!(
            parser.parse(&mut BytesMut::from(&b":9223372036854775807\r\n"[..])).unwrap(),
            Some(RespValue::Integer(i64::MAX))
        );
    }

    #[test]
    fn encode_matches_wire_format() {
        let value = RespValue::Array(Some(vec![
            RespValue::Simple(b"OK".to_vec()),
            RespValue::Bulk(None),
            RespValue::Integer(7),
        ]));
        assert_eq!(value.to_bytes(), b"*3\r\n+OK\r\n$-1\r\n:7\r\n".to_vec());
        let push = RespValue::Push(vec![RespValue::Bulk(Some(b"hi".to_vec()))]);
        assert_eq!(push.to_bytes(), b">1\r\n$2\r\nhi\r\n".to_vec());
    }
}
