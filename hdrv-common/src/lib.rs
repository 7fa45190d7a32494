// hdrv-common - Shared vocabulary for the hierdis connection driver
//
// This crate defines the error/message taxonomy, the control-call command
// table and frame layouts, and the RESP codec the driver speaks.

pub mod control;
pub mod error;
pub mod protocol;
pub mod resp;
pub mod taxonomy;

// Re-export for convenience
pub use control::*;
pub use error::*;
pub use protocol::*;
pub use resp::*;
pub use taxonomy::*;
