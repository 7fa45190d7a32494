//! # Driver Lifecycle
//!
//! Purpose: Run the process-wide init/finish hooks and create or destroy
//! driver instances (`Port`s).
//!
//! ## Design Principles
//! 1. **Refcounted Hooks**: `init` may run once per embedding component;
//!    `finish` releases on the last matching call.
//! 2. **One Lock, One Job**: The process-wide mutex guards the init count
//!    only. Per-connection state never touches it.
//! 3. **RAII Guard**: `Driver` pairs `init` with `finish` on drop and hands
//!    out ports that share its configuration.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use hdrv_common::{DriverError, DriverResult, LinkState, Taxonomy, TAXONOMY};

use crate::config::DriverConfig;
use crate::handle::{ConnectionHandle, Io};
use crate::notify::NotificationSink;
use crate::source::EventSource;

static INIT_REFS: Mutex<usize> = parking_lot::const_mutex(0);

/// Process-wide init hook. Returns the shared taxonomy.
pub fn init() -> &'static Taxonomy {
    let mut refs = INIT_REFS.lock();
    *refs += 1;
    trace!(refs = *refs, "driver init");
    &TAXONOMY
}

/// Process-wide teardown hook, paired with `init`.
pub fn finish() -> DriverResult<()> {
    let mut refs = INIT_REFS.lock();
    if *refs == 0 {
        return Err(DriverError::AlreadyFinished);
    }
    *refs -= 1;
    trace!(refs = *refs, "driver finish");
    Ok(())
}

pub fn is_initialized() -> bool {
    *INIT_REFS.lock() > 0
}

struct DriverInner {
    config: Arc<DriverConfig>,
    taxonomy: &'static Taxonomy,
}

impl Drop for DriverInner {
    fn drop(&mut self) {
        if let Err(err) = finish() {
            debug!(%err, "driver finish on drop");
        }
    }
}

/// Initialized driver; cloning shares the same init reference.
#[derive(Clone)]
pub struct Driver {
    inner: Arc<DriverInner>,
}

impl Driver {
    /// Runs the init hook and keeps it alive until the last clone drops.
    pub fn init(config: DriverConfig) -> Self {
        let taxonomy = init();
        Driver {
            inner: Arc::new(DriverInner {
                config: Arc::new(config),
                taxonomy,
            }),
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.inner.config
    }

    pub fn taxonomy(&self) -> &'static Taxonomy {
        self.inner.taxonomy
    }

    /// Starts one instance bound to `source` and `sink`.
    pub fn start<S: EventSource, N: NotificationSink>(&self, source: S, sink: N) -> DriverResult<Port<S, N>> {
        Port::start(self.inner.config.clone(), source, sink)
    }
}

/// One driver instance: a connection handle plus its event source and sink.
///
/// The event bridge (`ready_input`, `ready_output`, `timeout`) and the
/// control-call channel (`call`) are methods on this type; all take
/// `&mut self`, so they never run concurrently on the same instance.
pub struct Port<S: EventSource, N: NotificationSink> {
    pub(crate) handle: ConnectionHandle,
    pub(crate) source: S,
    pub(crate) sink: N,
    pub(crate) config: Arc<DriverConfig>,
}

impl<S: EventSource, N: NotificationSink> Port<S, N> {
    /// Instance start hook. Fails unless the process-wide hook has run.
    pub fn start(config: Arc<DriverConfig>, source: S, sink: N) -> DriverResult<Self> {
        if !is_initialized() {
            return Err(DriverError::NotInitialized);
        }
        trace!("port start");
        Ok(Port {
            handle: ConnectionHandle::new(),
            source,
            sink,
            config,
        })
    }

    /// Instance stop hook. A live connection is closed and reports `closed`.
    ///
    /// Dropping a port has the same effect; `stop` makes the intent explicit.
    pub fn stop(mut self) {
        self.shutdown();
        trace!("port stop");
    }

    fn shutdown(&mut self) {
        if self.handle.state().is_terminal() {
            return;
        }
        let (mut io, handle) = self.split();
        if let Err(failure) = handle.close(&mut io) {
            debug!(%failure, "close during stop");
        }
    }

    /// Borrows the handle alongside its collaborators.
    pub(crate) fn split(&mut self) -> (Io<'_>, &mut ConnectionHandle) {
        let io = Io {
            source: &mut self.source,
            sink: &mut self.sink,
            config: &self.config,
        };
        (io, &mut self.handle)
    }

    pub fn state(&self) -> LinkState {
        self.handle.state()
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn sink(&self) -> &N {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut N {
        &mut self.sink
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}

impl<S: EventSource, N: NotificationSink> Drop for Port<S, N> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
