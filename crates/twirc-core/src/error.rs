//! Error types shared by the core layer.
//!
//! Transport and framework errors live in their own crates; this module only
//! covers what the message model itself can get wrong.

use thiserror::Error;

// =============================================================================
// Parse Errors
// =============================================================================

/// Errors produced while turning a raw protocol line into a [`Message`].
///
/// A parse error never aborts a read loop: the offending line is dropped and
/// the error is reported through logging.
///
/// [`Message`]: crate::Message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line was empty after stripping the delimiter.
    #[error("empty line")]
    EmptyLine,

    /// A tag or source prefix was present but no command followed it.
    #[error("missing command in line: {line:?}")]
    MissingCommand {
        /// The offending line.
        line: String,
    },

    /// The command is known but a required parameter is absent.
    #[error("{command} is missing its {parameter}")]
    MissingParameter {
        /// The protocol verb (`PRIVMSG`, `WHISPER`, ...).
        command: String,
        /// Human readable name of the missing parameter.
        parameter: &'static str,
    },

    /// The `@tags` prefix could not be split into key/value pairs.
    #[error("malformed tags: {0:?}")]
    MalformedTags(String),

    /// The `:source` prefix was empty.
    #[error("malformed source prefix: {0:?}")]
    MalformedSource(String),

    /// A channel or user name contains whitespace, NUL or a comma.
    #[error("invalid {parameter} name: {name:?}")]
    InvalidName {
        parameter: &'static str,
        name: String,
    },
}

impl ParseError {
    /// Creates a missing parameter error for the given verb.
    pub fn missing(command: impl Into<String>, parameter: &'static str) -> Self {
        Self::MissingParameter {
            command: command.into(),
            parameter,
        }
    }
}

// =============================================================================
// Encode Errors
// =============================================================================

/// Errors produced while framing a [`Message`] for the wire.
///
/// [`Message`]: crate::Message
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    /// A control line does not fit into the protocol line limit.
    ///
    /// Chat and whisper payloads are truncated instead of raising this.
    #[error("line of {actual} bytes exceeds the {limit} byte limit")]
    LineTooLong {
        /// Encoded length including the delimiter.
        actual: usize,
        /// Configured maximum.
        limit: usize,
    },

    /// A channel or recipient name would split or extend the line.
    #[error("invalid target name: {name:?}")]
    InvalidTarget { name: String },

    /// The message kind is inbound-only and has no outbound form.
    #[error("{kind} messages cannot be sent")]
    NotSendable {
        /// Variant name of the rejected message.
        kind: &'static str,
    },
}

// =============================================================================
// Send Errors
// =============================================================================

/// Errors returned by an [`Outbox`](crate::Outbox) when queueing a message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The outbox has been shut down; nothing further will be delivered.
    #[error("outbox is closed")]
    Closed,

    /// The message could not be framed.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The message could not be built from the given parts.
    #[error(transparent)]
    Invalid(#[from] ParseError),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for encoding operations.
pub type EncodeResult<T> = Result<T, EncodeError>;

/// Result type for send operations.
pub type SendResult<T> = Result<T, SendError>;
