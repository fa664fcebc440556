//! The typed message model.
//!
//! Every line received from (or sent to) chat is represented as a
//! [`Message`]: a set of attributes common to all lines plus a closed
//! [`MessageKind`] describing the verb-specific payload.
//!
//! ```text
//! Message { raw, timestamp, tags, source, kind }
//! └── MessageKind
//!     ├── Chat(ChatMessage { channel, text })
//!     ├── Whisper(WhisperMessage { recipient, text })
//!     ├── GlobalNotice(GlobalNotice { text })
//!     ├── Notice(Notice { channel, text })
//!     ├── UserNotice(UserNotice { channel, text })
//!     ├── Join / Part / UserState { channel }
//!     ├── Ping / Pong { origin }
//!     └── Raw { command, params }
//! ```
//!
//! Messages are immutable once built. Equality is structural over the
//! source, tags and kind; the raw text and timestamp are bookkeeping.

pub mod source;
pub mod tags;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use source::Source;
pub use tags::{Badge, EmoteRange, Tags};

use crate::encode;
use crate::error::{ParseError, ParseResult};

// =============================================================================
// Variant payloads
// =============================================================================

/// A public message in a channel (`PRIVMSG #channel :text`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub channel: String,
    pub text: String,
}

/// A private message between two users.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhisperMessage {
    /// Nickname the whisper is addressed to.
    pub recipient: String,
    pub text: String,
}

/// A server notice that is not tied to a channel (`NOTICE * :text`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalNotice {
    pub text: String,
}

/// A server notice scoped to a channel. The `msg-id` tag names its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub channel: String,
    pub text: String,
}

/// A channel event such as a subscription or raid.
///
/// The details live in the tags; `text` is the optional user-supplied
/// message attached to the event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNotice {
    pub channel: String,
    pub text: Option<String>,
}

/// The closed set of message variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Chat(ChatMessage),
    Whisper(WhisperMessage),
    GlobalNotice(GlobalNotice),
    Notice(Notice),
    UserNotice(UserNotice),
    Join { channel: String },
    Part { channel: String },
    /// The connected user's own state in a channel (badges, mod status).
    UserState { channel: String },
    Ping { origin: Option<String> },
    Pong { origin: Option<String> },
    /// Any verb this library has no dedicated variant for, numerics included.
    Raw { command: String, params: Vec<String> },
}

impl MessageKind {
    /// Short variant name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chat(_) => "Chat",
            Self::Whisper(_) => "Whisper",
            Self::GlobalNotice(_) => "GlobalNotice",
            Self::Notice(_) => "Notice",
            Self::UserNotice(_) => "UserNotice",
            Self::Join { .. } => "Join",
            Self::Part { .. } => "Part",
            Self::UserState { .. } => "UserState",
            Self::Ping { .. } => "Ping",
            Self::Pong { .. } => "Pong",
            Self::Raw { .. } => "Raw",
        }
    }

    /// The protocol verb for this variant.
    pub fn command(&self) -> &str {
        match self {
            Self::Chat(_) => "PRIVMSG",
            Self::Whisper(_) => "WHISPER",
            Self::GlobalNotice(_) | Self::Notice(_) => "NOTICE",
            Self::UserNotice(_) => "USERNOTICE",
            Self::Join { .. } => "JOIN",
            Self::Part { .. } => "PART",
            Self::UserState { .. } => "USERSTATE",
            Self::Ping { .. } => "PING",
            Self::Pong { .. } => "PONG",
            Self::Raw { command, .. } => command,
        }
    }
}

// =============================================================================
// Message
// =============================================================================

/// A single protocol message with its parsed attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    raw: String,
    timestamp: DateTime<Utc>,
    tags: Tags,
    source: Option<Source>,
    kind: MessageKind,
}

impl Message {
    /// Assembles a message from already validated parts.
    pub(crate) fn from_parts(
        raw: String,
        tags: Tags,
        source: Option<Source>,
        kind: MessageKind,
    ) -> Self {
        let timestamp = tags.sent_at().unwrap_or_else(Utc::now);
        Self {
            raw,
            timestamp,
            tags,
            source,
            kind,
        }
    }

    fn build(tags: Tags, source: Option<Source>, kind: MessageKind) -> Self {
        let mut message = Self::from_parts(String::new(), tags, source, kind);
        message.raw = encode::to_line(&message);
        message
    }

    /// Creates a message of the given kind with no tags or source.
    pub fn new(kind: MessageKind) -> Self {
        Self::build(Tags::new(), None, kind)
    }

    /// Parses one protocol line. See [`crate::parse::parse_line`].
    pub fn parse(line: &str) -> ParseResult<Self> {
        crate::parse::parse_line(line)
    }

    // -------------------------------------------------------------------------
    // Constructors
    // -------------------------------------------------------------------------

    /// A chat message to `channel`. The channel is required.
    pub fn chat(channel: impl AsRef<str>, text: impl Into<String>) -> ParseResult<Self> {
        let channel = require_channel("PRIVMSG", channel.as_ref())?;
        Ok(Self::new(MessageKind::Chat(ChatMessage {
            channel,
            text: text.into(),
        })))
    }

    /// A whisper to `recipient`. The recipient is required.
    pub fn whisper(recipient: impl AsRef<str>, text: impl Into<String>) -> ParseResult<Self> {
        let recipient = recipient.as_ref().trim().to_lowercase();
        if recipient.is_empty() {
            return Err(ParseError::missing("WHISPER", "recipient"));
        }
        if !is_valid_name(&recipient) {
            return Err(ParseError::InvalidName {
                parameter: "recipient",
                name: recipient,
            });
        }
        Ok(Self::new(MessageKind::Whisper(WhisperMessage {
            recipient,
            text: text.into(),
        })))
    }

    pub fn global_notice(text: impl Into<String>) -> Self {
        Self::new(MessageKind::GlobalNotice(GlobalNotice { text: text.into() }))
    }

    pub fn notice(channel: impl AsRef<str>, text: impl Into<String>) -> ParseResult<Self> {
        let channel = require_channel("NOTICE", channel.as_ref())?;
        Ok(Self::new(MessageKind::Notice(Notice {
            channel,
            text: text.into(),
        })))
    }

    pub fn user_notice(channel: impl AsRef<str>, text: Option<String>) -> ParseResult<Self> {
        let channel = require_channel("USERNOTICE", channel.as_ref())?;
        Ok(Self::new(MessageKind::UserNotice(UserNotice { channel, text })))
    }

    pub fn join(channel: impl AsRef<str>) -> ParseResult<Self> {
        let channel = require_channel("JOIN", channel.as_ref())?;
        Ok(Self::new(MessageKind::Join { channel }))
    }

    pub fn part(channel: impl AsRef<str>) -> ParseResult<Self> {
        let channel = require_channel("PART", channel.as_ref())?;
        Ok(Self::new(MessageKind::Part { channel }))
    }

    pub fn ping(origin: Option<String>) -> Self {
        Self::new(MessageKind::Ping { origin })
    }

    pub fn pong(origin: Option<String>) -> Self {
        Self::new(MessageKind::Pong { origin })
    }

    /// An arbitrary protocol line, e.g. `CAP REQ` or `NICK`.
    pub fn raw(command: impl Into<String>, params: Vec<String>) -> Self {
        Self::new(MessageKind::Raw {
            command: command.into().to_uppercase(),
            params,
        })
    }

    /// Returns a copy of this message with the given tags attached.
    pub fn with_tags(self, tags: Tags) -> Self {
        Self::build(tags, self.source, self.kind)
    }

    /// Returns a copy of this message with the given source attached.
    pub fn with_source(self, source: Source) -> Self {
        Self::build(self.tags, Some(source), self.kind)
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// The line this message was parsed from, or its canonical encoding.
    pub fn raw_text(&self) -> &str {
        &self.raw
    }

    /// Server timestamp when tagged, otherwise construction time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn source(&self) -> Option<&Source> {
        self.source.as_ref()
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    /// Nickname of the sender, if the line carried a source prefix.
    pub fn sender(&self) -> Option<&str> {
        self.source.as_ref().map(Source::nick)
    }

    /// Display name from the tags, falling back to the nickname.
    pub fn sender_display_name(&self) -> Option<&str> {
        self.tags.display_name().or_else(|| self.sender())
    }

    /// The channel this message belongs to, without the `#`.
    pub fn channel(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Chat(m) => Some(&m.channel),
            MessageKind::Notice(n) => Some(&n.channel),
            MessageKind::UserNotice(n) => Some(&n.channel),
            MessageKind::Join { channel }
            | MessageKind::Part { channel }
            | MessageKind::UserState { channel } => Some(channel),
            _ => None,
        }
    }

    /// The free-form text payload, if the variant has one.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Chat(m) => Some(&m.text),
            MessageKind::Whisper(w) => Some(&w.text),
            MessageKind::GlobalNotice(n) => Some(&n.text),
            MessageKind::Notice(n) => Some(&n.text),
            MessageKind::UserNotice(n) => n.text.as_deref(),
            _ => None,
        }
    }

    pub fn as_chat(&self) -> Option<&ChatMessage> {
        match &self.kind {
            MessageKind::Chat(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_whisper(&self) -> Option<&WhisperMessage> {
        match &self.kind {
            MessageKind::Whisper(w) => Some(w),
            _ => None,
        }
    }

    pub fn is_chat(&self) -> bool {
        matches!(self.kind, MessageKind::Chat(_))
    }

    pub fn is_ping(&self) -> bool {
        matches!(self.kind, MessageKind::Ping { .. })
    }

    // -------------------------------------------------------------------------
    // Replies
    // -------------------------------------------------------------------------

    /// Builds a reply on the same medium: chat for chat, whisper for whisper.
    pub fn reply(&self, text: impl Into<String>) -> Option<Self> {
        match &self.kind {
            MessageKind::Chat(m) => Self::chat(&m.channel, text).ok(),
            MessageKind::Whisper(_) => self.reply_whisper(text),
            _ => None,
        }
    }

    /// Builds a whisper back to the sender.
    pub fn reply_whisper(&self, text: impl Into<String>) -> Option<Self> {
        Self::whisper(self.sender()?, text).ok()
    }

    /// Builds the PONG answering this PING.
    pub fn pong_reply(&self) -> Option<Self> {
        match &self.kind {
            MessageKind::Ping { origin } => Some(Self::pong(origin.clone())),
            _ => None,
        }
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.source == other.source && self.tags == other.tags
    }
}

impl Eq for Message {}

impl std::str::FromStr for Message {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let who = self.sender_display_name().unwrap_or("?");
        match &self.kind {
            MessageKind::Chat(m) => write!(f, "Chat #{} <{who}> {}", m.channel, m.text),
            MessageKind::Whisper(w) => write!(f, "Whisper {who} -> {}: {}", w.recipient, w.text),
            MessageKind::GlobalNotice(n) => write!(f, "GlobalNotice: {}", n.text),
            MessageKind::Notice(n) => write!(
                f,
                "Notice #{} [{}]: {}",
                n.channel,
                self.tags.notice_id().unwrap_or("-"),
                n.text
            ),
            MessageKind::UserNotice(n) => write!(
                f,
                "UserNotice #{} [{}]{}",
                n.channel,
                self.tags.notice_id().unwrap_or("-"),
                n.text.as_deref().map(|t| format!(": {t}")).unwrap_or_default()
            ),
            MessageKind::Join { channel } => write!(f, "Join #{channel} <{who}>"),
            MessageKind::Part { channel } => write!(f, "Part #{channel} <{who}>"),
            MessageKind::UserState { channel } => write!(f, "UserState #{channel}"),
            MessageKind::Ping { origin } => {
                write!(f, "Ping {}", origin.as_deref().unwrap_or(""))
            }
            MessageKind::Pong { origin } => {
                write!(f, "Pong {}", origin.as_deref().unwrap_or(""))
            }
            MessageKind::Raw { command, params } => {
                write!(f, "Raw {command} {}", params.join(" "))
            }
        }
    }
}

/// Normalises a channel name: trims, drops the leading `#`, lower-cases.
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_lowercase()
}

/// Whether `name` can stand as a channel or user name on the wire.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().any(|c| c.is_whitespace() || c == '\0' || c == ',')
}

fn require_channel(command: &str, channel: &str) -> ParseResult<String> {
    let channel = normalize_channel(channel);
    if channel.is_empty() {
        return Err(ParseError::missing(command, "channel"));
    }
    if !is_valid_name(&channel) {
        return Err(ParseError::InvalidName {
            parameter: "channel",
            name: channel,
        });
    }
    Ok(channel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constructors_validate_required_fields() {
        assert!(Message::chat("", "hi").is_err());
        assert!(Message::chat("#", "hi").is_err());
        assert!(Message::whisper("  ", "hi").is_err());
        assert!(Message::join("").is_err());

        let chat = Message::chat("#SomeChannel", "hi").unwrap();
        assert_eq!(chat.channel(), Some("somechannel"));
        assert_eq!(chat.text(), Some("hi"));
        assert_eq!(chat.raw_text(), "PRIVMSG #somechannel :hi");
    }

    #[test]
    fn test_constructors_reject_names_that_split_lines() {
        assert!(matches!(
            Message::chat("victim\r\nPRIVMSG #other :pwned", "hi"),
            Err(ParseError::InvalidName { parameter: "channel", .. })
        ));
        assert!(matches!(
            Message::whisper("bob\r\nJOIN #evil", "hi"),
            Err(ParseError::InvalidName { parameter: "recipient", .. })
        ));
        assert!(Message::join("a,b").is_err());
        assert!(Message::part("a b").is_err());
        assert!(Message::whisper("nu\0l", "hi").is_err());

        assert!(is_valid_name("some_channel"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn test_equality_ignores_raw_and_timestamp() {
        let a = Message::parse("PRIVMSG #chan :hello").unwrap();
        let b = Message::chat("chan", "hello").unwrap();
        assert_eq!(a, b);

        let c = Message::chat("chan", "bye").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_replies() {
        let chat = Message::parse(":alice!alice@alice.tmi.twitch.tv PRIVMSG #chan :!ping").unwrap();
        let reply = chat.reply("pong").unwrap();
        assert_eq!(reply.channel(), Some("chan"));
        assert_eq!(reply.text(), Some("pong"));

        let whisper = chat.reply_whisper("psst").unwrap();
        assert_eq!(whisper.as_whisper().unwrap().recipient, "alice");

        let ping = Message::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(
            ping.pong_reply().unwrap(),
            Message::pong(Some("tmi.twitch.tv".into()))
        );
        assert!(chat.pong_reply().is_none());
    }

    #[test]
    fn test_display_includes_variant_and_fields() {
        let chat = Message::parse("@display-name=Alice :alice!alice@h PRIVMSG #chan :hey").unwrap();
        assert_eq!(chat.to_string(), "Chat #chan <Alice> hey");

        let notice = Message::parse("@msg-id=slow_on :tmi.twitch.tv NOTICE #chan :Slow mode.").unwrap();
        assert_eq!(notice.to_string(), "Notice #chan [slow_on]: Slow mode.");
    }

    #[test]
    fn test_timestamp_from_tags() {
        let msg = Message::parse("@tmi-sent-ts=1700000000000 PRIVMSG #chan :x").unwrap();
        assert_eq!(msg.timestamp().timestamp(), 1_700_000_000);
    }
}
