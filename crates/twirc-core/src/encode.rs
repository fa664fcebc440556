//! Line encoding.
//!
//! Two forms are produced:
//!
//! - [`to_line`]: the canonical line, tags and source included. Parsing it
//!   again yields an equal [`Message`].
//! - [`to_wire`]: the outbound form a client actually writes, terminated by
//!   CRLF and bounded by [`MAX_LINE_LEN`].

use crate::error::{EncodeError, EncodeResult};
use crate::message::{Message, MessageKind, is_valid_name};

/// Maximum outbound line length in bytes, CRLF included.
pub const MAX_LINE_LEN: usize = 512;

/// Channel that whispers are routed through on the chat connection.
pub const WHISPER_CHANNEL: &str = "jtv";

const CRLF: &str = "\r\n";

/// Encodes the canonical form of `message`, without the line delimiter.
pub fn to_line(message: &Message) -> String {
    let mut line = String::new();
    if !message.tags().is_empty() {
        line.push('@');
        line.push_str(&message.tags().encode());
        line.push(' ');
    }
    if let Some(source) = message.source() {
        line.push(':');
        line.push_str(&source.to_string());
        line.push(' ');
    }
    line.push_str(&body(message.kind()));
    line
}

/// Encodes `message` for sending, including the trailing CRLF.
///
/// Chat and whisper text longer than `limit` allows is truncated at a
/// character boundary. Any other line over the limit is rejected. CR and LF
/// inside payloads are replaced by spaces so one message always maps to one
/// line.
pub fn to_wire(message: &Message, limit: usize) -> EncodeResult<String> {
    if let Some(name) = target(message.kind()).filter(|name| !is_valid_name(name)) {
        return Err(EncodeError::InvalidTarget {
            name: name.to_string(),
        });
    }

    let (head, text) = match message.kind() {
        MessageKind::Chat(chat) => (format!("PRIVMSG #{} :", chat.channel), &chat.text),
        MessageKind::Whisper(whisper) => (
            format!("PRIVMSG #{WHISPER_CHANNEL} :/w {} ", whisper.recipient),
            &whisper.text,
        ),
        MessageKind::GlobalNotice(_)
        | MessageKind::Notice(_)
        | MessageKind::UserNotice(_)
        | MessageKind::UserState { .. } => {
            return Err(EncodeError::NotSendable {
                kind: message.kind().name(),
            });
        }
        kind => {
            let line = format!("{}{CRLF}", sanitize(&body(kind)));
            if line.len() > limit {
                return Err(EncodeError::LineTooLong {
                    actual: line.len(),
                    limit,
                });
            }
            return Ok(line);
        }
    };

    let budget = limit.saturating_sub(head.len() + CRLF.len());
    if budget == 0 {
        return Err(EncodeError::LineTooLong {
            actual: head.len() + text.len() + CRLF.len(),
            limit,
        });
    }
    let text = sanitize(text);
    Ok(format!("{head}{}{CRLF}", truncate(&text, budget)))
}

/// Returns the longest prefix of `text` that fits in `max` bytes without
/// splitting a character.
pub fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn target(kind: &MessageKind) -> Option<&str> {
    match kind {
        MessageKind::Chat(chat) => Some(&chat.channel),
        MessageKind::Whisper(whisper) => Some(&whisper.recipient),
        MessageKind::Join { channel } | MessageKind::Part { channel } => Some(channel),
        _ => None,
    }
}

fn sanitize(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

fn body(kind: &MessageKind) -> String {
    match kind {
        MessageKind::Chat(chat) => format!("PRIVMSG #{} :{}", chat.channel, chat.text),
        MessageKind::Whisper(whisper) => format!("WHISPER {} :{}", whisper.recipient, whisper.text),
        MessageKind::GlobalNotice(notice) => format!("NOTICE * :{}", notice.text),
        MessageKind::Notice(notice) => format!("NOTICE #{} :{}", notice.channel, notice.text),
        MessageKind::UserNotice(notice) => match &notice.text {
            Some(text) => format!("USERNOTICE #{} :{text}", notice.channel),
            None => format!("USERNOTICE #{}", notice.channel),
        },
        MessageKind::Join { channel } => format!("JOIN #{channel}"),
        MessageKind::Part { channel } => format!("PART #{channel}"),
        MessageKind::UserState { channel } => format!("USERSTATE #{channel}"),
        MessageKind::Ping { origin } => with_origin("PING", origin.as_deref()),
        MessageKind::Pong { origin } => with_origin("PONG", origin.as_deref()),
        MessageKind::Raw { command, params } => {
            let mut line = command.clone();
            let count = params.len();
            for (index, param) in params.iter().enumerate() {
                line.push(' ');
                let last = index + 1 == count;
                if last && needs_trailing(param) {
                    line.push(':');
                }
                line.push_str(param);
            }
            line
        }
    }
}

fn with_origin(command: &str, origin: Option<&str>) -> String {
    match origin {
        Some(origin) => format!("{command} :{origin}"),
        None => command.to_string(),
    }
}

fn needs_trailing(param: &str) -> bool {
    param.is_empty() || param.contains(' ') || param.starts_with(':')
}
