//! # mio Host Adapter
//!
//! Purpose: A ready-made event source and dispatch loop for running ports
//! outside a managed runtime: one `mio::Poll`, one token per port, and a
//! per-port one-shot timer.
//!
//! ## Structure Overview
//!
//! ```text
//! MioHost
//!   ├── poll: mio::Poll
//!   └── ports: HashMap<Token, Port<MioSource, N>>
//!                 └── MioSource { registry, token, interest, timer }
//! ```
//!
//! Each `run_once` cycle polls until the earliest timer, delivers at most one
//! output-ready and one input-ready trigger per port, then fires due timers.

use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use hashbrown::HashMap;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use tracing::{debug, trace};

use hdrv_common::{CallError, CallResult, DriverResult};

use crate::bridge::Trigger;
use crate::lifecycle::{Driver, Port};
use crate::notify::NotificationSink;
use crate::source::{EventSource, Readiness};

const EVENT_CAPACITY: usize = 256;

/// `EventSource` backed by a shared `mio::Registry`.
#[derive(Debug)]
pub struct MioSource {
    registry: Registry,
    token: Token,
    interest: Option<Interest>,
    timer: Option<Instant>,
}

impl MioSource {
    pub fn new(registry: Registry, token: Token) -> Self {
        MioSource {
            registry,
            token,
            interest: None,
            timer: None,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    /// Currently registered interest, if any.
    pub fn interest(&self) -> Option<Interest> {
        self.interest
    }

    /// Absolute expiry of the armed timer.
    pub fn timer(&self) -> Option<Instant> {
        self.timer
    }
}

fn interest_bit(kind: Readiness) -> Interest {
    match kind {
        Readiness::Input => Interest::READABLE,
        Readiness::Output => Interest::WRITABLE,
    }
}

impl EventSource for MioSource {
    fn select(&mut self, fd: RawFd, kind: Readiness, on: bool) -> io::Result<()> {
        let bit = interest_bit(kind);
        let next = match (self.interest, on) {
            (None, true) => Some(bit),
            (None, false) => None,
            (Some(current), true) => Some(current | bit),
            (Some(current), false) => current.remove(bit),
        };

        let mut source = SourceFd(&fd);
        match (self.interest, next) {
            (None, Some(interest)) => self.registry.register(&mut source, self.token, interest)?,
            (Some(current), Some(interest)) if current != interest => {
                self.registry.reregister(&mut source, self.token, interest)?
            }
            (Some(_), None) => self.registry.deregister(&mut source)?,
            _ => {}
        }
        trace!(token = self.token.0, ?next, "interest updated");
        self.interest = next;
        Ok(())
    }

    fn set_timer(&mut self, after: Option<Duration>) {
        self.timer = after.map(|d| Instant::now() + d);
    }
}

/// Single-threaded dispatch loop for a set of ports.
pub struct MioHost<N: NotificationSink> {
    driver: Driver,
    poll: Poll,
    events: Events,
    ports: HashMap<Token, Port<MioSource, N>>,
    next_token: usize,
}

impl<N: NotificationSink> MioHost<N> {
    pub fn new(driver: Driver) -> io::Result<Self> {
        Ok(MioHost {
            driver,
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_CAPACITY),
            ports: HashMap::new(),
            next_token: 0,
        })
    }

    /// Starts a port that reports to `sink`.
    pub fn open(&mut self, sink: N) -> DriverResult<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        let source = MioSource::new(self.poll.registry().try_clone()?, token);
        let port = self.driver.start(source, sink)?;
        self.ports.insert(token, port);
        debug!(token = token.0, "port opened");
        Ok(token)
    }

    /// Stops and removes a port; unknown tokens are ignored.
    pub fn close(&mut self, token: Token) {
        if let Some(port) = self.ports.remove(&token) {
            port.stop();
            debug!(token = token.0, "port removed");
        }
    }

    /// Control call against one port.
    pub fn call(&mut self, token: Token, code: u32, input: &[u8], output: &mut [u8]) -> CallResult<usize> {
        let port = self
            .ports
            .get_mut(&token)
            .ok_or(CallError::BadArgument("unknown port"))?;
        port.call(code, input, output)
    }

    pub fn port(&self, token: Token) -> Option<&Port<MioSource, N>> {
        self.ports.get(&token)
    }

    pub fn port_mut(&mut self, token: Token) -> Option<&mut Port<MioSource, N>> {
        self.ports.get_mut(&token)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Earliest armed timer across all ports.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.ports.values().filter_map(|port| port.source().timer()).min()
    }

    /// Polls once and dispatches what became ready; returns the trigger count.
    pub fn run_once(&mut self, max_wait: Option<Duration>) -> io::Result<usize> {
        let now = Instant::now();
        let until_timer = self.next_deadline().map(|at| at.saturating_duration_since(now));
        let wait = match (max_wait, until_timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        match self.poll.poll(&mut self.events, wait) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(0),
            Err(err) => return Err(err),
        }

        let mut dispatched = 0;
        for event in self.events.iter() {
            let Some(port) = self.ports.get_mut(&event.token()) else {
                continue;
            };
            // Output first so a completed connect opens before any read.
            if event.is_writable() || event.is_write_closed() || event.is_error() {
                port.dispatch(Trigger::OutputReady);
                dispatched += 1;
            }
            if event.is_readable() || event.is_read_closed() || event.is_error() {
                port.dispatch(Trigger::InputReady);
                dispatched += 1;
            }
        }

        let now = Instant::now();
        for port in self.ports.values_mut() {
            let due = matches!(port.source().timer(), Some(at) if at <= now);
            if due {
                port.source_mut().timer = None;
                port.dispatch(Trigger::Timeout);
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }

    /// Runs cycles until `done` holds or `limit` elapses. Returns whether
    /// `done` was satisfied.
    pub fn run_until(&mut self, limit: Duration, mut done: impl FnMut(&Self) -> bool) -> io::Result<bool> {
        let give_up = Instant::now() + limit;
        loop {
            if done(self) {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= give_up {
                return Ok(false);
            }
            self.run_once(Some(give_up - now))?;
        }
    }
}
