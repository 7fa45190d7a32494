//! Error types shared by the driver crates.

use thiserror::Error;

/// Sentinel returned to the host for a rejected control call.
pub const CALL_ERROR_BADARG: isize = -3;

/// Sentinel returned to the host when the output area is too small.
pub const CALL_ERROR_CAPACITY: isize = -2;

/// Result type for control calls: the number of bytes written on success.
pub type CallResult<T> = Result<T, CallError>;

/// Caller errors reported synchronously by the control-call channel.
///
/// These never become async notifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// Unknown command code, malformed payload, or oversized request.
    #[error("bad argument: {0}")]
    BadArgument(&'static str),
    /// The caller-supplied output area cannot hold the response.
    #[error("insufficient capacity: need {needed} bytes, have {available}")]
    InsufficientCapacity { needed: usize, available: usize },
}

impl CallError {
    /// Negative sentinel for the host boundary.
    pub const fn code(&self) -> isize {
        match self {
            CallError::BadArgument(_) => CALL_ERROR_BADARG,
            CallError::InsufficientCapacity { .. } => CALL_ERROR_CAPACITY,
        }
    }
}

/// RESP decoding failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RespError {
    #[error("protocol error: {0}")]
    Protocol(&'static str),
}

/// Result type for RESP decoding.
pub type RespResult<T> = Result<T, RespError>;

/// Driver lifecycle errors.
#[derive(Debug, Error)]
pub enum DriverError {
    /// An instance was started before the process-wide init hook ran.
    #[error("driver not initialized")]
    NotInitialized,
    /// `finish` was called more often than `init`.
    #[error("driver already finished")]
    AlreadyFinished,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for lifecycle operations.
pub type DriverResult<T> = Result<T, DriverError>;
