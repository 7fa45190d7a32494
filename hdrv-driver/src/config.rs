//! Driver configuration.

use std::time::Duration;

use serde::Deserialize;

/// Per-instance configuration shared by every port a driver starts.
///
/// Durations are stored in milliseconds so the struct maps directly onto a
/// JSON config file; missing fields fall back to `Default`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Deadline for a CONNECT whose request carries no timeout.
    pub connect_timeout_ms: u64,
    /// Bound on a blocking COMMAND control call.
    pub command_timeout_ms: u64,
    /// Deadline armed while async requests are outstanding; `None` disables it.
    pub reply_timeout_ms: Option<u64>,
    /// Largest control-call input accepted.
    pub max_request_bytes: usize,
    /// Largest outbound queue before APPEND reports out-of-memory.
    pub max_outbound_bytes: usize,
    /// Bytes requested from the socket per read.
    pub read_chunk: usize,
    /// Bytes one input-ready trigger may read before yielding to the host.
    pub read_budget: usize,
    /// Disable Nagle on connected sockets.
    pub nodelay: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            connect_timeout_ms: 5_000,
            command_timeout_ms: 5_000,
            reply_timeout_ms: None,
            max_request_bytes: 512 * 1024,
            max_outbound_bytes: 64 * 1024 * 1024,
            read_chunk: 16 * 1024,
            read_budget: 1024 * 1024,
            nodelay: true,
        }
    }
}

impl DriverConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn reply_timeout(&self) -> Option<Duration> {
        self.reply_timeout_ms.map(Duration::from_millis)
    }

    /// Parses a JSON document.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = DriverConfig::from_json(r#"{"reply_timeout_ms": 250, "nodelay": false}"#).unwrap();
        assert_eq!(config.reply_timeout(), Some(Duration::from_millis(250)));
        assert!(!config.nodelay);
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.read_chunk, DriverConfig::default().read_chunk);
        assert_eq!(config.read_budget, 1024 * 1024);
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(DriverConfig::from_json(r#"{"read_chunk": "big"}"#).is_err());
    }
}
