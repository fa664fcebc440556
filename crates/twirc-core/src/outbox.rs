//! The outbound seam.
//!
//! Handlers and scheduled tasks never touch the connection directly. They
//! hand messages to an [`Outbox`], which the transport layer implements with
//! its rate-limited queues.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{SendError, SendResult};
use crate::message::Message;

/// Accepts outbound messages for delivery.
///
/// `send` only enqueues; it never waits for the rate limiter or the socket.
pub trait Outbox: Send + Sync {
    /// Enqueues a message.
    fn send(&self, message: Message) -> SendResult<()>;

    /// Enqueues a chat message to `channel`.
    fn say(&self, channel: &str, text: &str) -> SendResult<()> {
        self.send(Message::chat(channel, text)?)
    }
}

/// Shared handle to an outbox.
pub type SharedOutbox = Arc<dyn Outbox>;

/// An outbox that refuses every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClosedOutbox;

impl Outbox for ClosedOutbox {
    fn send(&self, _message: Message) -> SendResult<()> {
        Err(SendError::Closed)
    }
}

/// An outbox that records messages in memory instead of sending them.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    sent: Mutex<Vec<Message>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns and clears everything sent so far.
    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// Returns a copy of everything sent so far.
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.lock().is_empty()
    }
}

impl Outbox for MemoryOutbox {
    fn send(&self, message: Message) -> SendResult<()> {
        self.sent.lock().push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_outbox_records() {
        let outbox = MemoryOutbox::new();
        outbox.say("#chan", "hi").unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.take()[0].text(), Some("hi"));
        assert!(outbox.is_empty());
        assert!(outbox.say("", "hi").is_err());
    }

    #[test]
    fn test_closed_outbox_refuses() {
        assert_eq!(
            ClosedOutbox.send(Message::ping(None)),
            Err(SendError::Closed)
        );
    }
}
