//! # Connection Handle
//!
//! Purpose: Own one Redis socket together with its buffers, reply queue,
//! deadline and lifecycle state, and perform the I/O steps the event bridge
//! and the control-call channel ask for.
//!
//! ## State Machine
//!
//! ```text
//! Created ──connect──▶ Connecting ──output-ready ok──▶ Open
//!                          │                             │
//!                          │ refused / deadline          │ close request
//!                          ▼                             ▼
//!                        Closed ◀────── fatal ───────  Closing ──▶ Closed
//! ```
//!
//! ## Design Principles
//! 1. **Single Owner**: Every operation takes `&mut self`; the bridge and the
//!    control channel serialize on the handle by construction.
//! 2. **Idempotent Interest**: Registration state is mirrored locally so the
//!    event source only sees real changes.
//! 3. **One Teardown Path**: Close and every fatal error funnel through
//!    `teardown`, which deregisters, drops the socket and clears buffers.
//! 4. **Drain on Edge**: Writes loop until `WouldBlock`. Reads do too, up to
//!    `read_budget` bytes per trigger; past that, input interest is re-armed
//!    so edge-triggered sources report the remainder on the next cycle.
//! 5. **Pushes Are Not Replies**: RESP3 push frames always go out as
//!    messages and never consume an outstanding request.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tracing::{debug, trace, warn};

use hdrv_common::{encode_command, ErrorTag, LinkState, RespParser, RespValue, StatusReport};

use crate::config::DriverConfig;
use crate::notify::{Notification, NotificationSink};
use crate::source::{EventSource, Readiness};

/// A failed handle operation, already mapped onto the taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{tag}: {detail}")]
pub struct Failure {
    pub tag: ErrorTag,
    pub detail: String,
}

impl Failure {
    pub fn new(tag: ErrorTag, detail: impl Into<String>) -> Self {
        Failure {
            tag,
            detail: detail.into(),
        }
    }

    fn closed() -> Self {
        Failure::new(ErrorTag::Context, "connection closed")
    }
}

pub type HandleResult<T> = Result<T, Failure>;

/// Collaborators a handle operation may touch.
pub struct Io<'a> {
    pub source: &'a mut dyn EventSource,
    pub sink: &'a mut dyn NotificationSink,
    pub config: &'a DriverConfig,
}

#[derive(Debug, Default, Clone, Copy)]
struct Interest {
    input: bool,
    output: bool,
}

impl Interest {
    fn slot(&mut self, kind: Readiness) -> &mut bool {
        match kind {
            Readiness::Input => &mut self.input,
            Readiness::Output => &mut self.output,
        }
    }
}

/// Per-instance connection state.
#[derive(Debug)]
pub struct ConnectionHandle {
    state: LinkState,
    stream: Option<TcpStream>,
    peer: Option<SocketAddr>,
    outbound: BytesMut,
    inbound: BytesMut,
    parser: RespParser,
    // Async requests written or queued whose replies have not arrived.
    pending: usize,
    deadline: Option<Instant>,
    interest: Interest,
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionHandle {
    pub fn new() -> Self {
        ConnectionHandle {
            state: LinkState::Created,
            stream: None,
            peer: None,
            outbound: BytesMut::new(),
            inbound: BytesMut::new(),
            parser: RespParser::new(),
            pending: 0,
            deadline: None,
            interest: Interest::default(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(|s| s.as_raw_fd())
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            state: self.state,
            pending: self.pending.min(u32::MAX as usize) as u32,
            outbound: self.outbound.len().min(u32::MAX as usize) as u32,
        }
    }

    fn ensure_live(&self) -> HandleResult<()> {
        if self.state.is_terminal() {
            return Err(Failure::closed());
        }
        Ok(())
    }

    /// Starts a non-blocking connect and registers for output-readiness.
    pub fn connect(&mut self, io: &mut Io<'_>, addr: SocketAddr, timeout: Duration) -> HandleResult<LinkState> {
        self.ensure_live()?;
        if self.state != LinkState::Created {
            return Err(Failure::new(ErrorTag::Context, "connect already initiated"));
        }
        debug!(%addr, ?timeout, "initiating connect");

        let stream = match mio::net::TcpStream::connect(addr) {
            Ok(stream) => stream,
            Err(err) => return Err(self.fatal(io, ErrorTag::from_io(&err), err.to_string())),
        };
        // Still non-blocking after the hand-over.
        let stream = TcpStream::from(OwnedFd::from(stream));

        self.stream = Some(stream);
        self.state = LinkState::Connecting;
        if let Err(err) = self.want(io, Readiness::Output, true) {
            return Err(self.fatal(io, ErrorTag::Io, err.to_string()));
        }
        self.arm(io, Some(timeout));
        Ok(self.state)
    }

    /// Output-ready step: completes a pending connect, then flushes.
    pub fn write_ready(&mut self, io: &mut Io<'_>) -> HandleResult<()> {
        self.ensure_live()?;
        match self.state {
            LinkState::Connecting => self.finish_connect(io),
            LinkState::Open => self.flush(io),
            // Spurious trigger before connect; nothing registered.
            _ => Ok(()),
        }
    }

    fn finish_connect(&mut self, io: &mut Io<'_>) -> HandleResult<()> {
        let Some(stream) = self.stream.as_ref() else {
            return Err(self.fatal(io, ErrorTag::Context, "connecting without a socket"));
        };

        let failed = match stream.take_error() {
            Ok(Some(err)) | Err(err) => Some(err),
            Ok(None) => None,
        };
        if let Some(err) = failed {
            return Err(self.fatal(io, ErrorTag::Io, err.to_string()));
        }

        let peer = match stream.peer_addr() {
            Ok(peer) => peer,
            Err(err) if err.kind() == io::ErrorKind::NotConnected => {
                trace!("connect still in progress");
                return Ok(());
            }
            Err(err) => return Err(self.fatal(io, ErrorTag::Io, err.to_string())),
        };

        if io.config.nodelay {
            if let Err(err) = stream.set_nodelay(true) {
                warn!(%err, "failed to disable nagle");
            }
        }

        self.peer = Some(peer);
        self.state = LinkState::Open;
        debug!(%peer, "connection open");
        io.sink.notify(Notification::Opened);

        self.rearm_reply_timer(io);
        if let Err(err) = self.want(io, Readiness::Input, true) {
            return Err(self.fatal(io, ErrorTag::Io, err.to_string()));
        }
        // Commands appended while connecting go out now.
        self.flush(io)
    }

    fn flush(&mut self, io: &mut Io<'_>) -> HandleResult<()> {
        while !self.outbound.is_empty() {
            let Some(stream) = self.stream.as_mut() else {
                return Err(self.fatal(io, ErrorTag::Context, "open without a socket"));
            };
            match stream.write(&self.outbound) {
                Ok(0) => return Err(self.fatal(io, ErrorTag::Io, "socket accepted zero bytes")),
                Ok(n) => {
                    trace!(bytes = n, "flushed");
                    self.outbound.advance(n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(self.fatal(io, ErrorTag::Io, err.to_string())),
            }
        }

        let drained = self.outbound.is_empty();
        if let Err(err) = self.want(io, Readiness::Output, !drained) {
            return Err(self.fatal(io, ErrorTag::Io, err.to_string()));
        }
        Ok(())
    }

    /// Input-ready step: drains the socket and delivers every decoded value.
    pub fn read_ready(&mut self, io: &mut Io<'_>) -> HandleResult<()> {
        self.ensure_live()?;
        if self.state != LinkState::Open {
            return Ok(());
        }

        let chunk = io.config.read_chunk.max(1);
        let budget = io.config.read_budget.max(chunk);
        let mut read = 0;
        let mut eof = false;
        loop {
            if read >= budget {
                trace!(bytes = read, "read budget spent; yielding");
                if let Err(err) = self.rearm_input(io) {
                    return Err(self.fatal(io, ErrorTag::Io, err.to_string()));
                }
                break;
            }
            let Some(stream) = self.stream.as_mut() else {
                return Err(self.fatal(io, ErrorTag::Context, "open without a socket"));
            };
            let start = self.inbound.len();
            self.inbound.resize(start + chunk, 0);
            match stream.read(&mut self.inbound[start..]) {
                Ok(0) => {
                    self.inbound.truncate(start);
                    eof = true;
                    break;
                }
                Ok(n) => {
                    self.inbound.truncate(start + n);
                    read += n;
                    trace!(bytes = n, "read");
                    self.drain_parsed(io)?;
                }
                Err(err) => {
                    self.inbound.truncate(start);
                    match err.kind() {
                        io::ErrorKind::WouldBlock => break,
                        io::ErrorKind::Interrupted => continue,
                        _ => return Err(self.fatal(io, ErrorTag::Io, err.to_string())),
                    }
                }
            }
        }

        // Values that arrived ahead of the EOF are still delivered.
        self.drain_parsed(io)?;
        if eof {
            return Err(self.fatal(io, ErrorTag::Eof, "connection closed by peer"));
        }
        Ok(())
    }

    fn drain_parsed(&mut self, io: &mut Io<'_>) -> HandleResult<()> {
        loop {
            match self.parser.parse(&mut self.inbound) {
                Ok(Some(value)) => self.deliver(io, value),
                Ok(None) => return Ok(()),
                Err(err) => return Err(self.fatal(io, ErrorTag::Protocol, err.to_string())),
            }
        }
    }

    fn deliver(&mut self, io: &mut Io<'_>, value: RespValue) {
        if !value.is_push() && self.pending > 0 {
            self.pending -= 1;
            io.sink.notify(Notification::Reply(value));
            self.rearm_reply_timer(io);
        } else {
            io.sink.notify(Notification::Message(value));
        }
    }

    /// Timeout step: fails the handle once an armed deadline has elapsed.
    pub fn timeout(&mut self, io: &mut Io<'_>) -> HandleResult<()> {
        self.ensure_live()?;
        let Some(deadline) = self.deadline else {
            return Ok(());
        };
        let now = Instant::now();
        if now < deadline {
            // Early wake-up; ask again for the remainder.
            io.source.set_timer(Some(deadline - now));
            return Ok(());
        }

        self.deadline = None;
        let detail = match self.state {
            LinkState::Connecting => "connect deadline elapsed",
            _ if self.pending > 0 => "reply deadline elapsed",
            _ => "deadline elapsed",
        };
        Err(self.fatal(io, ErrorTag::Timeout, detail))
    }

    /// Queues a command on the async path; returns the outstanding count.
    pub fn append(&mut self, io: &mut Io<'_>, args: &[&[u8]]) -> HandleResult<usize> {
        self.ensure_live()?;
        if self.state == LinkState::Created {
            return Err(Failure::new(ErrorTag::Context, "not connected"));
        }

        let mut encoded = Vec::new();
        encode_command(args, &mut encoded);
        if self.outbound.len() + encoded.len() > io.config.max_outbound_bytes {
            return Err(Failure::new(ErrorTag::OutOfMemory, "outbound buffer limit reached"));
        }

        self.outbound.extend_from_slice(&encoded);
        self.pending += 1;
        if self.pending == 1 {
            self.rearm_reply_timer(io);
        }
        // While connecting, output interest is already held for the connect.
        if self.state == LinkState::Open {
            if let Err(err) = self.want(io, Readiness::Output, true) {
                return Err(self.fatal(io, ErrorTag::Io, err.to_string()));
            }
        }
        Ok(self.pending)
    }

    /// Sends one command and blocks, up to `timeout`, for its reply.
    ///
    /// Anything queued earlier is written first, and replies to those
    /// requests are delivered as notifications before this reply returns.
    pub fn command(&mut self, io: &mut Io<'_>, args: &[&[u8]], timeout: Duration) -> HandleResult<RespValue> {
        self.ensure_live()?;
        if self.state != LinkState::Open {
            return Err(Failure::new(ErrorTag::Context, "not connected"));
        }

        let mut encoded = Vec::new();
        encode_command(args, &mut encoded);
        self.outbound.extend_from_slice(&encoded);

        let deadline = Instant::now() + timeout;
        let result = self.command_blocking(io, deadline);

        match result {
            Ok(value) => {
                if let Some(stream) = self.stream.as_ref() {
                    if let Err(err) = stream.set_nonblocking(true) {
                        return Err(self.fatal(io, ErrorTag::Io, err.to_string()));
                    }
                }
                if let Err(err) = self.want(io, Readiness::Output, false) {
                    return Err(self.fatal(io, ErrorTag::Io, err.to_string()));
                }
                // Later replies read in the same chunk go out as notifications.
                self.drain_parsed(io)?;
                self.rearm_reply_timer(io);
                Ok(value)
            }
            Err(failure) if failure.tag == ErrorTag::Context => Err(failure),
            Err(failure) => Err(self.fatal(io, failure.tag, failure.detail)),
        }
    }

    fn command_blocking(&mut self, io: &mut Io<'_>, deadline: Instant) -> HandleResult<RespValue> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(Failure::new(ErrorTag::Context, "open without a socket"));
        };
        stream.set_nonblocking(false).map_err(io_failure)?;

        while !self.outbound.is_empty() {
            stream.set_write_timeout(Some(remaining(deadline)?)).map_err(io_failure)?;
            match stream.write(&self.outbound) {
                Ok(0) => return Err(Failure::new(ErrorTag::Io, "socket accepted zero bytes")),
                Ok(n) => self.outbound.advance(n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(io_failure(err)),
            }
        }

        let mut chunk = vec![0u8; io.config.read_chunk.max(1)];
        loop {
            loop {
                let value = match self.parser.parse(&mut self.inbound) {
                    Ok(Some(value)) => value,
                    Ok(None) => break,
                    Err(err) => return Err(Failure::new(ErrorTag::Protocol, err.to_string())),
                };
                if value.is_push() {
                    io.sink.notify(Notification::Message(value));
                } else if self.pending > 0 {
                    self.pending -= 1;
                    io.sink.notify(Notification::Reply(value));
                } else {
                    return Ok(value);
                }
            }

            stream.set_read_timeout(Some(remaining(deadline)?)).map_err(io_failure)?;
            match stream.read(&mut chunk) {
                Ok(0) => return Err(Failure::new(ErrorTag::Eof, "connection closed by peer")),
                Ok(n) => self.inbound.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(io_failure(err)),
            }
        }
    }

    /// Arms (or with `None` disarms) the handle deadline explicitly.
    ///
    /// Only an open connection accepts this; the connect deadline stays in
    /// charge until then.
    pub fn set_deadline(&mut self, io: &mut Io<'_>, after: Option<Duration>) -> HandleResult<()> {
        self.ensure_live()?;
        if self.state != LinkState::Open {
            return Err(Failure::new(ErrorTag::Context, "not connected"));
        }
        self.arm(io, after);
        Ok(())
    }

    /// Closes on request and reports `closed`. Outstanding replies are dropped.
    pub fn close(&mut self, io: &mut Io<'_>) -> HandleResult<()> {
        self.ensure_live()?;
        debug!(pending = self.pending, "closing on request");
        self.state = LinkState::Closing;
        self.teardown(io);
        io.sink.notify(Notification::Closed);
        Ok(())
    }

    /// Closes after a non-recoverable error and reports it once.
    fn fatal(&mut self, io: &mut Io<'_>, tag: ErrorTag, detail: impl Into<String>) -> Failure {
        let failure = Failure::new(tag, detail);
        if self.state.is_terminal() {
            return failure;
        }
        warn!(tag = tag.ident(), detail = %failure.detail, "closing after fatal error");
        self.state = LinkState::Closing;
        self.teardown(io);
        io.sink.notify(Notification::error(tag, failure.detail.clone()));
        failure
    }

    fn teardown(&mut self, io: &mut Io<'_>) {
        if let Some(fd) = self.fd() {
            for kind in [Readiness::Input, Readiness::Output] {
                if std::mem::take(self.interest.slot(kind)) {
                    if let Err(err) = io.source.select(fd, kind, false) {
                        trace!(%err, ?kind, "deselect during teardown failed");
                    }
                }
            }
        }
        if self.deadline.take().is_some() {
            io.source.set_timer(None);
        }
        // Dropping the stream closes the descriptor, once.
        self.stream = None;
        self.outbound = BytesMut::new();
        self.inbound = BytesMut::new();
        self.pending = 0;
        self.state = LinkState::Closed;
    }

    fn want(&mut self, io: &mut Io<'_>, kind: Readiness, on: bool) -> io::Result<()> {
        let Some(fd) = self.fd() else {
            return Ok(());
        };
        let slot = self.interest.slot(kind);
        if *slot == on {
            return Ok(());
        }
        io.source.select(fd, kind, on)?;
        *slot = on;
        Ok(())
    }

    // Dropping and restoring interest makes the source re-check readiness.
    fn rearm_input(&mut self, io: &mut Io<'_>) -> io::Result<()> {
        let Some(fd) = self.fd() else {
            return Ok(());
        };
        if !self.interest.input {
            return Ok(());
        }
        io.source.select(fd, Readiness::Input, false)?;
        io.source.select(fd, Readiness::Input, true)
    }

    fn arm(&mut self, io: &mut Io<'_>, after: Option<Duration>) {
        self.deadline = after.map(|d| Instant::now() + d);
        io.source.set_timer(after);
    }

    fn rearm_reply_timer(&mut self, io: &mut Io<'_>) {
        if self.state != LinkState::Open {
            // Connect deadline stays in charge until open.
            return;
        }
        match io.config.reply_timeout() {
            Some(timeout) if self.pending > 0 => self.arm(io, Some(timeout)),
            _ if self.deadline.is_some() => self.arm(io, None),
            _ => {}
        }
    }
}

fn remaining(deadline: Instant) -> HandleResult<Duration> {
    let left = deadline.saturating_duration_since(Instant::now());
    if left.is_zero() {
        return Err(Failure::new(ErrorTag::Timeout, "command deadline elapsed"));
    }
    Ok(left)
}

fn io_failure(err: io::Error) -> Failure {
    Failure::new(ErrorTag::from_io(&err), err.to_string())
}
