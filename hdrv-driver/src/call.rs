//! # Control-Call Channel
//!
//! Purpose: Execute one synchronous request against a port and frame the
//! result into the caller's output buffer.
//!
//! ## Contract
//! 1. Unknown codes, malformed payloads and oversized requests fail with
//!    `CallError::BadArgument`; the output buffer is untouched.
//! 2. The command runs against the handle (COMMAND may block, bounded by
//!    `command_timeout_ms`).
//! 3. A full response frame is written and its exact length returned.
//! 4. If the frame does not fit, `CallError::InsufficientCapacity` is
//!    returned and nothing is written. The command has still executed.
//!
//! The decoded `Request` borrows the input buffer and the `Outcome` is
//! dropped before `call` returns, so nothing carries over between calls.

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};

use hdrv_common::{
    decode_args, decode_connect, decode_timeout, write_response, CallCommand, CallError, CallResult, ErrorTag,
    LinkState, Outcome, RespValue,
};

use crate::handle::Failure;
use crate::lifecycle::Port;
use crate::notify::NotificationSink;
use crate::source::EventSource;

/// A decoded control-call request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    Connect { addr: SocketAddr, timeout: Option<Duration> },
    Command(Vec<&'a [u8]>),
    Append(Vec<&'a [u8]>),
    Status,
    Close,
    Timeout(Option<Duration>),
}

impl<'a> Request<'a> {
    /// Decodes the payload for `command`.
    pub fn decode(command: CallCommand, input: &'a [u8]) -> CallResult<Self> {
        if !command.has_payload() && !input.is_empty() {
            return Err(CallError::BadArgument("command takes no payload"));
        }
        let request = match command {
            CallCommand::Connect => {
                let (timeout_ms, addr) = decode_connect(input)?;
                Request::Connect {
                    addr: resolve(addr)?,
                    timeout: millis(timeout_ms),
                }
            }
            CallCommand::Command => Request::Command(decode_args(input)?),
            CallCommand::Append => Request::Append(decode_args(input)?),
            CallCommand::Status => Request::Status,
            CallCommand::Close => Request::Close,
            CallCommand::Timeout => Request::Timeout(millis(decode_timeout(input)?)),
        };
        Ok(request)
    }
}

fn millis(ms: u32) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms as u64))
}

fn resolve(addr: &str) -> CallResult<SocketAddr> {
    addr.to_socket_addrs()
        .map_err(|_| CallError::BadArgument("unresolvable address"))?
        .next()
        .ok_or(CallError::BadArgument("unresolvable address"))
}

impl From<Failure> for Outcome {
    fn from(failure: Failure) -> Self {
        Outcome::Err(failure.tag, failure.detail)
    }
}

impl<S: EventSource, N: NotificationSink> Port<S, N> {
    /// Control-call entry point.
    ///
    /// `code` is the host-supplied command number; `output` is the caller's
    /// fixed-capacity result area. Returns the number of bytes written.
    pub fn call(&mut self, code: u32, input: &[u8], output: &mut [u8]) -> CallResult<usize> {
        trace!(code, input = input.len(), capacity = output.len(), "call");
        let command = CallCommand::from_code(code).ok_or(CallError::BadArgument("unknown command"))?;
        if input.len() > self.config.max_request_bytes {
            return Err(CallError::BadArgument("request too large"));
        }

        let request = Request::decode(command, input)?;
        let outcome = self.execute(request);
        if let Outcome::Err(tag, detail) = &outcome {
            debug!(%command, tag = tag.ident(), %detail, "call failed");
        }
        write_response(output, command, &outcome)
    }

    /// Runs a decoded request against the handle.
    pub fn execute(&mut self, request: Request<'_>) -> Outcome {
        let command_timeout = self.config.command_timeout();
        let connect_timeout = self.config.connect_timeout();
        let (mut io, handle) = self.split();

        let result = match request {
            Request::Connect { addr, timeout } => handle
                .connect(&mut io, addr, timeout.unwrap_or(connect_timeout))
                .map(|state| vec![state.as_u8()]),
            Request::Command(args) => match handle.command(&mut io, &args, command_timeout) {
                Ok(RespValue::Error(text)) => {
                    return Outcome::Err(ErrorTag::Reply, String::from_utf8_lossy(&text).into_owned());
                }
                Ok(value) => Ok(value.to_bytes()),
                Err(failure) => Err(failure),
            },
            Request::Append(args) => handle
                .append(&mut io, &args)
                .map(|pending| (pending.min(u32::MAX as usize) as u32).to_be_bytes().to_vec()),
            Request::Status => match handle.state() {
                LinkState::Closing | LinkState::Closed => Err(Failure::new(ErrorTag::Context, "connection closed")),
                _ => Ok(handle.status().encode()),
            },
            Request::Close => handle.close(&mut io).map(|()| Vec::new()),
            Request::Timeout(after) => handle.set_deadline(&mut io, after).map(|()| Vec::new()),
        };

        match result {
            Ok(body) => Outcome::Ok(body),
            Err(failure) => failure.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hdrv_common::{encode_args, encode_connect};

    #[test]
    fn decodes_each_command() {
        let mut payload = Vec::new();
        encode_connect(0, "127.0.0.1:6379", &mut payload);
        assert_eq!(
            Request::decode(CallCommand::Connect, &payload).unwrap(),
            Request::Connect {
                addr: "127.0.0.1:6379".parse().unwrap(),
                timeout: None,
            }
        );

        let mut payload = Vec::new();
        encode_args(&[b"GET", b"k"], &mut payload);
        assert_eq!(
            Request::decode(CallCommand::Append, &payload).unwrap(),
            Request::Append(vec![&b"GET"[..], &b"k"[..]])
        );

        assert_eq!(Request::decode(CallCommand::Status, &[]).unwrap(), Request::Status);
        assert_eq!(
            Request::decode(CallCommand::Timeout, &[0, 0, 1, 0]).unwrap(),
            Request::Timeout(Some(Duration::from_millis(256)))
        );
        assert_eq!(
            Request::decode(CallCommand::Timeout, &[0, 0, 0, 0]).unwrap(),
            Request::Timeout(None)
        );
    }

    #[test]
    fn payload_on_empty_commands_is_rejected() {
        assert_eq!(
            Request::decode(CallCommand::Close, b"x"),
            Err(CallError::BadArgument("command takes no payload"))
        );
    }

    #[test]
    fn bad_address_is_rejected() {
        let mut payload = Vec::new();
        encode_connect(0, "not an address", &mut payload);
        assert!(Request::decode(CallCommand::Connect, &payload).is_err());
    }
}
