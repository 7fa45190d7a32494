//! # hierdis Connection Driver
//!
//! Purpose: Drive one non-blocking Redis connection per instance on behalf
//! of a host runtime, with an asynchronous event path and a synchronous
//! control-call path over the same connection handle.
//!
//! ## Design Principles
//! 1. **Host-Agnostic Core**: Readiness and timers come in through the
//!    `EventSource` trait; notifications leave through `NotificationSink`.
//! 2. **Closed Vocabulary**: Everything outward is a `Notification` built
//!    from the taxonomy in `hdrv-common`.
//! 3. **Exclusive Ownership**: A `Port` owns its handle, and every entry
//!    point takes `&mut self`.
//! 4. **Bounded Blocking**: Only the COMMAND control call blocks, and only
//!    up to its configured deadline.

mod bridge;
mod call;
mod config;
mod handle;
mod host;
mod lifecycle;
mod notify;
mod source;

pub use bridge::Trigger;
pub use call::Request;
pub use config::DriverConfig;
pub use handle::{ConnectionHandle, Failure, HandleResult};
pub use host::{MioHost, MioSource};
pub use lifecycle::{finish, init, is_initialized, Driver, Port};
pub use notify::{Notification, NotificationSink};
pub use source::{EventSource, Readiness};

pub use mio::Token;
