//! # Event Bridge
//!
//! Maps the host's three triggers onto connection-handle steps:
//!
//! ```text
//! input-ready  ──▶ ConnectionHandle::read_ready   (drain, parse, reply/message)
//! output-ready ──▶ ConnectionHandle::write_ready  (finish connect, flush)
//! timeout      ──▶ ConnectionHandle::timeout      (deadline check)
//! ```
//!
//! Triggers that arrive after the handle closed are ignored; the handle
//! reports a terminal failure which is only traced here, since the owner has
//! already received the notification that closed it.

use tracing::trace;

use crate::handle::HandleResult;
use crate::lifecycle::Port;
use crate::notify::NotificationSink;
use crate::source::{EventSource, Readiness};

/// Trigger kinds delivered by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    InputReady,
    OutputReady,
    Timeout,
}

impl From<Readiness> for Trigger {
    fn from(kind: Readiness) -> Self {
        match kind {
            Readiness::Input => Trigger::InputReady,
            Readiness::Output => Trigger::OutputReady,
        }
    }
}

impl<S: EventSource, N: NotificationSink> Port<S, N> {
    /// Input-ready trigger.
    pub fn ready_input(&mut self) -> HandleResult<()> {
        trace!(state = ?self.state(), "ready_input");
        let (mut io, handle) = self.split();
        handle.read_ready(&mut io)
    }

    /// Output-ready trigger.
    pub fn ready_output(&mut self) -> HandleResult<()> {
        trace!(state = ?self.state(), "ready_output");
        let (mut io, handle) = self.split();
        handle.write_ready(&mut io)
    }

    /// Timer trigger.
    pub fn timeout(&mut self) -> HandleResult<()> {
        trace!(state = ?self.state(), "timeout");
        let (mut io, handle) = self.split();
        handle.timeout(&mut io)
    }

    /// Dispatches one trigger, tracing instead of returning the failure.
    ///
    /// Failures are already reported through the sink; hosts that only
    /// shuttle events use this.
    pub fn dispatch(&mut self, trigger: Trigger) {
        let result = match trigger {
            Trigger::InputReady => self.ready_input(),
            Trigger::OutputReady => self.ready_output(),
            Trigger::Timeout => self.timeout(),
        };
        if let Err(failure) = result {
            trace!(?trigger, %failure, "trigger ended in failure");
        }
    }
}
