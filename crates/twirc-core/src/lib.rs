//! # twirc Core
//!
//! Protocol-level building blocks for the twirc chat client.
//!
//! This crate knows nothing about sockets or tasks. It provides:
//!
//! - **Message model**: [`Message`] and the closed [`MessageKind`] set,
//!   with [`Tags`] and [`Source`] accessors
//! - **Parsing**: [`parse_line`] turns one protocol line into a [`Message`]
//! - **Encoding**: [`encode::to_line`] for the canonical form and
//!   [`encode::to_wire`] for bounded outbound lines
//! - **Permissions**: [`PermissionList`] and the bypass/group token helpers
//! - **Outbox**: the [`Outbox`] trait through which everything is sent
//!
//! ## Example
//!
//! ```rust
//! use twirc_core::{Message, MessageKind};
//!
//! let msg = Message::parse(
//!     "@display-name=Alice :alice!alice@alice.tmi.twitch.tv PRIVMSG #chan :!hello",
//! )
//! .unwrap();
//!
//! assert!(matches!(msg.kind(), MessageKind::Chat(_)));
//! assert_eq!(msg.channel(), Some("chan"));
//! assert_eq!(msg.sender_display_name(), Some("Alice"));
//!
//! let reply = msg.reply("Hello, Alice!").unwrap();
//! assert_eq!(reply.raw_text(), "PRIVMSG #chan :Hello, Alice!");
//! ```

pub mod encode;
pub mod error;
pub mod message;
pub mod outbox;
pub mod parse;
pub mod permission;

pub use encode::{MAX_LINE_LEN, to_line, to_wire};
pub use error::{EncodeError, EncodeResult, ParseError, ParseResult, SendError, SendResult};
pub use message::{
    Badge, ChatMessage, EmoteRange, GlobalNotice, Message, MessageKind, Notice, Source, Tags,
    UserNotice, WhisperMessage, is_valid_name, normalize_channel,
};
pub use outbox::{ClosedOutbox, MemoryOutbox, Outbox, SharedOutbox};
pub use parse::parse_line;
pub use permission::{GLOBAL_BYPASS, GROUP_PREFIX, PermissionList, group_token, local_bypass};
