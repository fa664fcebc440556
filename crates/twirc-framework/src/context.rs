//! Per-invocation context handed to command handlers.

use std::sync::Arc;

use twirc_core::{EncodeError, Message, PermissionList, SendError, SendResult, SharedOutbox};

use crate::matcher::Captures;

/// Everything a command handler gets to work with.
///
/// Cloning is cheap; the message and outbox are shared.
#[derive(Clone)]
pub struct CommandContext {
    message: Arc<Message>,
    captures: Captures,
    permissions: PermissionList,
    command: Arc<str>,
    outbox: SharedOutbox,
}

impl CommandContext {
    pub fn new(
        message: Arc<Message>,
        captures: Captures,
        permissions: PermissionList,
        command: Arc<str>,
        outbox: SharedOutbox,
    ) -> Self {
        Self {
            message,
            captures,
            permissions,
            command,
            outbox,
        }
    }

    /// The message that triggered the command.
    pub fn message(&self) -> &Message {
        &self.message
    }

    /// A shared handle to the triggering message.
    pub fn message_arc(&self) -> Arc<Message> {
        Arc::clone(&self.message)
    }

    /// Data captured by the command's matcher.
    pub fn captures(&self) -> &Captures {
        &self.captures
    }

    /// Shorthand for `captures().args()`.
    pub fn args(&self) -> &[String] {
        self.captures.args()
    }

    /// The sender's resolved permissions at dispatch time.
    pub fn permissions(&self) -> &PermissionList {
        &self.permissions
    }

    /// Name of the command being run.
    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn outbox(&self) -> &SharedOutbox {
        &self.outbox
    }

    /// Enqueues an arbitrary message.
    pub fn send(&self, message: Message) -> SendResult<()> {
        self.outbox.send(message)
    }

    /// Replies on the medium the command arrived on.
    pub fn reply(&self, text: impl Into<String>) -> SendResult<()> {
        let reply = self.message.reply(text).ok_or(SendError::Encode(EncodeError::NotSendable {
            kind: self.message.kind().name(),
        }))?;
        self.outbox.send(reply)
    }

    /// Replies to the sender with a whisper.
    pub fn reply_whisper(&self, text: impl Into<String>) -> SendResult<()> {
        let reply = self
            .message
            .reply_whisper(text)
            .ok_or(SendError::Encode(EncodeError::NotSendable {
                kind: self.message.kind().name(),
            }))?;
        self.outbox.send(reply)
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("command", &self.command)
            .field("message", &self.message)
            .field("captures", &self.captures)
            .finish_non_exhaustive()
    }
}
