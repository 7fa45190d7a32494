//! Event-source seam between the driver and whatever runtime hosts it.
//!
//! The host delivers three triggers per instance (input-ready, output-ready,
//! timeout) and accepts interest and timer requests through this trait. It
//! is the only coupling point to the host's readiness machinery; `MioHost`
//! is the bundled implementation.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

/// Readiness kinds a handle can register interest in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Readiness {
    Input,
    Output,
}

/// Interest registration requested by a connection handle.
pub trait EventSource {
    /// Turns interest in `kind` on or off for `fd`.
    ///
    /// The handle only calls this on an actual change, so implementations
    /// never see two consecutive `on` requests for the same kind.
    fn select(&mut self, fd: RawFd, kind: Readiness, on: bool) -> io::Result<()>;

    /// Arms the instance timer to fire once after `after`, or cancels it.
    ///
    /// Arming replaces any earlier timer.
    fn set_timer(&mut self, after: Option<Duration>);
}

impl<T: EventSource + ?Sized> EventSource for &mut T {
    fn select(&mut self, fd: RawFd, kind: Readiness, on: bool) -> io::Result<()> {
        (**self).select(fd, kind, on)
    }

    fn set_timer(&mut self, after: Option<Duration>) {
        (**self).set_timer(after)
    }
}
