//! Outward notifications and where they go.

use std::fmt;
use std::sync::mpsc::Sender;

use hdrv_common::{ErrorTag, MessageKind, RespValue};

/// Everything a driver instance may tell its owner.
///
/// This is the whole vocabulary: four message kinds and one error shape
/// carrying a taxonomy tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Connect completed.
    Opened,
    /// Closed on request; outstanding replies are dropped.
    Closed,
    /// A value arrived while no request was outstanding.
    Message(RespValue),
    /// The reply to the oldest outstanding async request.
    Reply(RespValue),
    /// A non-recoverable failure; the handle is already closed.
    Error { tag: ErrorTag, detail: String },
}

impl Notification {
    pub fn error(tag: ErrorTag, detail: impl Into<String>) -> Self {
        Notification::Error {
            tag,
            detail: detail.into(),
        }
    }

    /// Message kind, or `None` for error notifications.
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Notification::Opened => Some(MessageKind::Opened),
            Notification::Closed => Some(MessageKind::Closed),
            Notification::Message(_) => Some(MessageKind::Message),
            Notification::Reply(_) => Some(MessageKind::Reply),
            Notification::Error { .. } => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Notification::Error { .. })
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Message(value) | Notification::Reply(value) => {
                write!(f, "{} {}", self.kind().map(MessageKind::ident).unwrap_or_default(), value)
            }
            Notification::Error { tag, detail } => {
                write!(f, "error {} ({}): {}", tag.ident(), tag.label(), detail)
            }
            Notification::Opened | Notification::Closed => {
                f.write_str(self.kind().map(MessageKind::ident).unwrap_or_default())
            }
        }
    }
}

/// Receiver of a port's notifications.
pub trait NotificationSink {
    fn notify(&mut self, note: Notification);
}

impl NotificationSink for Vec<Notification> {
    fn notify(&mut self, note: Notification) {
        self.push(note);
    }
}

impl NotificationSink for Sender<Notification> {
    fn notify(&mut self, note: Notification) {
        if self.send(note).is_err() {
            tracing::debug!("notification receiver dropped");
        }
    }
}

impl<T: NotificationSink + ?Sized> NotificationSink for &mut T {
    fn notify(&mut self, note: Notification) {
        (**self).notify(note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_value_notifications() {
        assert_eq!(Notification::Opened.kind(), Some(MessageKind::Opened));
        assert_eq!(
            Notification::Reply(RespValue::Integer(1)).kind(),
            Some(MessageKind::Reply)
        );
        assert_eq!(Notification::error(ErrorTag::Eof, "peer").kind(), None);
    }

    #[test]
    fn display_is_readable() {
        let note = Notification::Reply(RespValue::Simple(b"PONG".to_vec()));
        assert_eq!(note.to_string(), "reply PONG");
        let err = Notification::error(ErrorTag::Timeout, "reply deadline elapsed");
        assert_eq!(err.to_string(), "error timeout (redis timeout): reply deadline elapsed");
        assert_eq!(Notification::Closed.to_string(), "closed");
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (mut tx, rx) = std::sync::mpsc::channel();
        tx.notify(Notification::Opened);
        assert_eq!(rx.recv().unwrap(), Notification::Opened);
        drop(rx);
        tx.notify(Notification::Closed);
    }
}
