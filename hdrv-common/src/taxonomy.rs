//! # Error/Message Taxonomy
//!
//! Purpose: Define the complete vocabulary the driver may emit toward its
//! host: four message kinds and eight error tags.
//!
//! ## Design Principles
//! 1. **Closed Set**: Every outward notification maps to exactly one entry here.
//! 2. **Static Table**: Identifiers and labels are `&'static str`; nothing is
//!    allocated per message.
//! 3. **Stable Codes**: Each tag has a `u8` code used in control-call frames,
//!    where `0` is reserved for success.
//!
//! ## Table Layout
//!
//! ```text
//! code | ident          | label
//! -----+----------------+-------------------------------
//!   1  | context-error  | redis context error
//!   2  | reply-error    | redis reply error
//!   3  | io-error       | redis i/o error
//!   4  | eof            | redis connection closed (eof)
//!   5  | protocol-error | redis protocol error
//!   6  | out-of-memory  | redis out of memory
//!   7  | timeout        | redis timeout
//!   8  | other          | redis unknown error
//! ```

use std::fmt;

/// Label used for successful control-call responses.
pub const LABEL_OK: &str = "ok";

/// Label used for failed control-call responses.
pub const LABEL_ERROR: &str = "error";

/// Error tag carried by every error notification and failed control call.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorTag {
    /// Operation against a handle in the wrong lifecycle state.
    Context = 1,
    /// Server answered with an error reply.
    Reply = 2,
    /// Socket-level failure.
    Io = 3,
    /// Peer closed the connection.
    Eof = 4,
    /// Byte stream could not be decoded.
    Protocol = 5,
    /// Buffer limits exceeded.
    OutOfMemory = 6,
    /// Armed deadline elapsed.
    Timeout = 7,
    /// Anything not covered above.
    Other = 8,
}

/// Outward message kinds that carry a value rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Opened,
    Closed,
    Message,
    Reply,
}

/// One (ident, label) row of the error table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxonomyEntry {
    pub tag: ErrorTag,
    pub ident: &'static str,
    pub label: &'static str,
}

/// Immutable process-wide taxonomy.
#[derive(Debug)]
pub struct Taxonomy {
    errors: [TaxonomyEntry; 8],
    messages: [(MessageKind, &'static str); 4],
}

/// The single taxonomy instance, handed out by the driver lifecycle hooks.
pub static TAXONOMY: Taxonomy = Taxonomy {
    errors: [
        entry(ErrorTag::Context, "context-error", "redis context error"),
        entry(ErrorTag::Reply, "reply-error", "redis reply error"),
        entry(ErrorTag::Io, "io-error", "redis i/o error"),
        entry(ErrorTag::Eof, "eof", "redis connection closed (eof)"),
        entry(ErrorTag::Protocol, "protocol-error", "redis protocol error"),
        entry(ErrorTag::OutOfMemory, "out-of-memory", "redis out of memory"),
        entry(ErrorTag::Timeout, "timeout", "redis timeout"),
        entry(ErrorTag::Other, "other", "redis unknown error"),
    ],
    messages: [
        (MessageKind::Opened, "opened"),
        (MessageKind::Closed, "closed"),
        (MessageKind::Message, "message"),
        (MessageKind::Reply, "reply"),
    ],
};

const fn entry(tag: ErrorTag, ident: &'static str, label: &'static str) -> TaxonomyEntry {
    TaxonomyEntry { tag, ident, label }
}

impl Taxonomy {
    /// Returns the table row for an error tag.
    pub fn error(&self, tag: ErrorTag) -> &TaxonomyEntry {
        // Codes are 1-based and dense.
        &self.errors[tag.code() as usize - 1]
    }

    /// Returns the identifier of a message kind.
    pub fn message(&self, kind: MessageKind) -> &'static str {
        self.messages
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, ident)| *ident)
            .unwrap_or(LABEL_ERROR)
    }

    /// Iterates all error rows in code order.
    pub fn errors(&self) -> impl Iterator<Item = &TaxonomyEntry> {
        self.errors.iter()
    }
}

impl ErrorTag {
    pub const ALL: [ErrorTag; 8] = [
        ErrorTag::Context,
        ErrorTag::Reply,
        ErrorTag::Io,
        ErrorTag::Eof,
        ErrorTag::Protocol,
        ErrorTag::OutOfMemory,
        ErrorTag::Timeout,
        ErrorTag::Other,
    ];

    /// Wire code used in control-call status bytes.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Parses a wire code back into a tag.
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Context),
            2 => Some(Self::Reply),
            3 => Some(Self::Io),
            4 => Some(Self::Eof),
            5 => Some(Self::Protocol),
            6 => Some(Self::OutOfMemory),
            7 => Some(Self::Timeout),
            8 => Some(Self::Other),
            _ => None,
        }
    }

    /// Short machine-stable identifier.
    pub fn ident(self) -> &'static str {
        TAXONOMY.error(self).ident
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        TAXONOMY.error(self).label
    }

    /// Maps a socket error onto the taxonomy.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ErrorTag::Timeout,
            ErrorKind::UnexpectedEof => ErrorTag::Eof,
            ErrorKind::OutOfMemory => ErrorTag::OutOfMemory,
            ErrorKind::InvalidData => ErrorTag::Protocol,
            _ => ErrorTag::Io,
        }
    }
}

impl MessageKind {
    pub fn ident(self) -> &'static str {
        TAXONOMY.message(self)
    }
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ident())
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ident())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip_and_are_dense() {
        for (idx, tag) in ErrorTag::ALL.iter().enumerate() {
            assert_eq!(tag.code() as usize, idx + 1);
            assert_eq!(ErrorTag::from_code(tag.code()), Some(*tag));
        }
        assert_eq!(ErrorTag::from_code(0), None);
        assert_eq!(ErrorTag::from_code(9), None);
    }

    #[test]
    fn table_rows_match_their_tags() {
        for row in TAXONOMY.errors() {
            assert_eq!(TAXONOMY.error(row.tag), row);
        }
        assert_eq!(TAXONOMY.errors().count(), 8);
    }

    #[test]
    fn identifiers_are_unique() {
        let idents: Vec<_> = ErrorTag::ALL.iter().map(|t| t.ident()).collect();
        for i in 0..idents.len() {
            for j in (i + 1)..idents.len() {
                assert_ne!(idents[i], idents[j]);
            }
        }
    }

    #[test]
    fn display_uses_ident() {
        assert_eq!(ErrorTag::Protocol.to_string(), "protocol-error");
        assert_eq!(ErrorTag::Eof.label(), "redis connection closed (eof)");
        assert_eq!(MessageKind::Reply.to_string(), "reply");
        assert_eq!(MessageKind::Opened.ident(), "opened");
    }

    #[test]
    fn io_errors_map_to_tags() {
        use std::io::{Error, ErrorKind};
        assert_eq!(ErrorTag::from_io(&Error::from(ErrorKind::TimedOut)), ErrorTag::Timeout);
        assert_eq!(ErrorTag::from_io(&Error::from(ErrorKind::ConnectionReset)), ErrorTag::Io);
        assert_eq!(ErrorTag::from_io(&Error::from(ErrorKind::UnexpectedEof)), ErrorTag::Eof);
    }
}
