// control.rs - control-call command definitions for the hierdis driver
//
// The control-call channel is the synchronous side door into a driver
// instance. The host hands over a command code, an input buffer, and an
// output buffer with a fixed capacity; the driver executes the command and
// writes a complete response frame before returning.
//
// ============================================================================
// CALL FLOW
// ============================================================================
//
//    host thread                          driver instance
//    -----------                          ---------------
//    call(code, input, output) ---------> validate code     (bad-arg if unknown)
//                                         decode payload    (bad-arg if malformed)
//                                         execute on handle (may block, bounded)
//                                         encode response   (capacity check)
//    <------------------------------------ Ok(len) / Err(sentinel)
//
// Nothing survives the call: request and response wrappers live on the stack
// of `call` and are dropped before it returns.
//
// ============================================================================
// DESIGN NOTES
// ============================================================================
//
// - Each command has a unique number (0-255), carried as u32 at the boundary
// - Commands are grouped: connection (0), data (1-2), monitoring (3),
//   control (4-5)
// - Magic number 'R' (0x52) prefixes every response frame

/// Magic number prefixed to every control-call response frame.
pub const CALL_MAGIC: u8 = b'R';

// ============================================================================
// COMMAND NUMBERS
// ============================================================================

/// Start a non-blocking connect.
///
/// - Input: timeout (ms, big-endian u32; 0 = configured default) + address
/// - Output: handle state after initiating the connect
pub const CMD_CONNECT: u8 = 0;

/// Send one command and wait for its reply inline.
///
/// - Input: argument vector
/// - Output: the reply, RESP-encoded
///
/// Replies to async requests queued earlier are delivered as notifications
/// before this call's own reply is returned.
pub const CMD_COMMAND: u8 = 1;

/// Queue one command on the async path.
///
/// - Input: argument vector
/// - Output: number of outstanding async requests
pub const CMD_APPEND: u8 = 2;

/// Query handle status.
///
/// - Input: none
/// - Output: state, outstanding requests, buffered outbound bytes
pub const CMD_STATUS: u8 = 3;

/// Close the connection.
///
/// - Input: none
/// - Output: none
pub const CMD_CLOSE: u8 = 4;

/// Arm or disarm the handle deadline.
///
/// - Input: timeout (ms, big-endian u32; 0 disarms)
/// - Output: none
pub const CMD_TIMEOUT: u8 = 5;

/// All available control-call commands.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCommand {
    Connect = CMD_CONNECT,
    Command = CMD_COMMAND,
    Append = CMD_APPEND,
    Status = CMD_STATUS,
    Close = CMD_CLOSE,
    Timeout = CMD_TIMEOUT,
}

impl CallCommand {
    /// Convert command to u8 number
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Try to create command from the host-supplied code
    pub const fn from_code(value: u32) -> Option<Self> {
        if value > u8::MAX as u32 {
            return None;
        }
        match value as u8 {
            CMD_CONNECT => Some(Self::Connect),
            CMD_COMMAND => Some(Self::Command),
            CMD_APPEND => Some(Self::Append),
            CMD_STATUS => Some(Self::Status),
            CMD_CLOSE => Some(Self::Close),
            CMD_TIMEOUT => Some(Self::Timeout),
            _ => None,
        }
    }

    /// Get human-readable command name
    pub const fn name(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Command => "COMMAND",
            Self::Append => "APPEND",
            Self::Status => "STATUS",
            Self::Close => "CLOSE",
            Self::Timeout => "TIMEOUT",
        }
    }

    /// Check if the command may block the caller
    pub const fn may_block(self) -> bool {
        matches!(self, Self::Command)
    }

    /// Check if the command carries a payload
    pub const fn has_payload(self) -> bool {
        !matches!(self, Self::Status | Self::Close)
    }
}

impl std::fmt::Display for CallCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_conversion() {
        let commands = [
            CallCommand::Connect,
            CallCommand::Command,
            CallCommand::Append,
            CallCommand::Status,
            CallCommand::Close,
            CallCommand::Timeout,
        ];

        for cmd in commands {
            let back = CallCommand::from_code(cmd.as_u8() as u32);
            assert_eq!(Some(cmd), back);
        }
    }

    #[test]
    fn test_invalid_command() {
        assert_eq!(CallCommand::from_code(6), None);
        assert_eq!(CallCommand::from_code(255), None);
        // Codes above u8 must not alias onto valid commands.
        assert_eq!(CallCommand::from_code(256), None);
        assert_eq!(CallCommand::from_code(u32::MAX), None);
    }

    #[test]
    fn test_command_classification() {
        assert!(CallCommand::Command.may_block());
        assert!(!CallCommand::Append.may_block());
        assert!(!CallCommand::Status.has_payload());
        assert!(CallCommand::Connect.has_payload());
    }

    #[test]
    fn test_command_display() {
        assert_eq!(format!("{}", CallCommand::Append), "APPEND");
    }

    #[test]
    fn test_magic_number() {
        assert_eq!(CALL_MAGIC, 0x52);
    }
}
