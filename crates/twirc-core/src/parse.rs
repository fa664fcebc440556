//! Line parser.
//!
//! Turns one protocol line into a [`Message`]. The grammar is the IRC line
//! with IRCv3 tags:
//!
//! ```text
//! [@tags ][:source ]COMMAND[ param]*[ :trailing]
//! ```
//!
//! Known verbs are validated and mapped to their [`MessageKind`] variant;
//! anything else (numerics included) becomes [`MessageKind::Raw`]. A
//! malformed line yields exactly one [`ParseError`] and never a partially
//! populated message.

use crate::error::{ParseError, ParseResult};
use crate::message::{
    normalize_channel, ChatMessage, GlobalNotice, Message, MessageKind, Notice, Source, Tags,
    UserNotice, WhisperMessage,
};

/// The pieces of a line before verb-specific validation.
#[derive(Debug)]
struct RawLine<'a> {
    tags: Option<&'a str>,
    source: Option<&'a str>,
    command: &'a str,
    params: Vec<&'a str>,
}

/// Parses a single line. A trailing `\r\n` is ignored.
pub fn parse_line(line: &str) -> ParseResult<Message> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(ParseError::EmptyLine);
    }

    let raw = split_line(line)?;
    let tags = match raw.tags {
        Some(body) => Tags::parse(body)?,
        None => Tags::new(),
    };
    let source = raw.source.map(Source::parse).transpose()?;
    let kind = classify(raw.command, raw.params)?;

    Ok(Message::from_parts(line.to_string(), tags, source, kind))
}

fn split_line(line: &str) -> ParseResult<RawLine<'_>> {
    let mut rest = line.trim_start();

    let tags = match rest.strip_prefix('@') {
        Some(after) => {
            let (body, tail) = after.split_once(' ').unwrap_or((after, ""));
            rest = tail.trim_start();
            Some(body)
        }
        None => None,
    };

    let source = match rest.strip_prefix(':') {
        Some(after) => {
            let (prefix, tail) = after.split_once(' ').unwrap_or((after, ""));
            rest = tail.trim_start();
            Some(prefix)
        }
        None => None,
    };

    let (command, tail) = rest.split_once(' ').unwrap_or((rest, ""));
    if command.is_empty() {
        return Err(ParseError::MissingCommand {
            line: line.to_string(),
        });
    }
    rest = tail;

    let mut params = Vec::new();
    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing);
            break;
        }
        let (param, tail) = rest.split_once(' ').unwrap_or((rest, ""));
        params.push(param);
        rest = tail;
    }

    Ok(RawLine {
        tags,
        source,
        command,
        params,
    })
}

fn classify(command: &str, params: Vec<&str>) -> ParseResult<MessageKind> {
    let verb = command.to_ascii_uppercase();
    let param = |index: usize, name: &'static str| -> ParseResult<String> {
        params
            .get(index)
            .map(|p| p.to_string())
            .ok_or_else(|| ParseError::missing(verb.as_str(), name))
    };
    let channel = |index: usize| -> ParseResult<String> {
        let channel = normalize_channel(&param(index, "channel")?);
        if channel.is_empty() {
            return Err(ParseError::missing(verb.as_str(), "channel"));
        }
        Ok(channel)
    };

    let kind = match verb.as_str() {
        "PRIVMSG" => MessageKind::Chat(ChatMessage {
            channel: channel(0)?,
            text: param(1, "text")?,
        }),
        "WHISPER" => {
            let recipient = param(0, "recipient")?.to_lowercase();
            if recipient.is_empty() {
                return Err(ParseError::missing(verb.as_str(), "recipient"));
            }
            MessageKind::Whisper(WhisperMessage {
                recipient,
                text: param(1, "text")?,
            })
        }
        "NOTICE" => {
            let target = param(0, "target")?;
            let text = param(1, "text")?;
            if target.starts_with('#') {
                MessageKind::Notice(Notice {
                    channel: channel(0)?,
                    text,
                })
            } else {
                MessageKind::GlobalNotice(GlobalNotice { text })
            }
        }
        "USERNOTICE" => MessageKind::UserNotice(UserNotice {
            channel: channel(0)?,
            text: params.get(1).map(|t| t.to_string()),
        }),
        "JOIN" => MessageKind::Join {
            channel: channel(0)?,
        },
        "PART" => MessageKind::Part {
            channel: channel(0)?,
        },
        "USERSTATE" => MessageKind::UserState {
            channel: channel(0)?,
        },
        "PING" => MessageKind::Ping {
            origin: params.last().map(|p| p.to_string()),
        },
        "PONG" => MessageKind::Pong {
            origin: params.last().map(|p| p.to_string()),
        },
        _ => MessageKind::Raw {
            command: verb.clone(),
            params: params.iter().map(|p| p.to_string()).collect(),
        },
    };
    Ok(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::to_line;

    fn round_trip(line: &str) {
        let parsed = parse_line(line).unwrap();
        let reparsed = parse_line(&to_line(&parsed)).unwrap();
        assert_eq!(parsed, reparsed, "round trip of {line:?}");
    }

    #[test]
    fn test_parse_chat_with_tags() {
        let msg = parse_line(
            "@badges=moderator/1;display-name=Alice;mod=1;tmi-sent-ts=1700000000000 \
             :alice!alice@alice.tmi.twitch.tv PRIVMSG #chan :hello there\r\n",
        )
        .unwrap();
        let chat = msg.as_chat().unwrap();
        assert_eq!(chat.channel, "chan");
        assert_eq!(chat.text, "hello there");
        assert_eq!(msg.sender(), Some("alice"));
        assert!(msg.tags().is_mod());
        assert!(msg.tags().has_badge("moderator"));
    }

    #[test]
    fn test_parse_variants() {
        let whisper = parse_line(":bob!bob@bob.tmi.twitch.tv WHISPER mybot :secret").unwrap();
        assert_eq!(whisper.as_whisper().unwrap().recipient, "mybot");

        let global = parse_line(":tmi.twitch.tv NOTICE * :Login authentication failed").unwrap();
        assert!(matches!(global.kind(), MessageKind::GlobalNotice(_)));

        let notice = parse_line("@msg-id=slow_on :tmi.twitch.tv NOTICE #chan :Slow").unwrap();
        assert!(matches!(notice.kind(), MessageKind::Notice(_)));
        assert_eq!(notice.tags().notice_id(), Some("slow_on"));

        let sub = parse_line("@msg-id=sub :tmi.twitch.tv USERNOTICE #chan").unwrap();
        assert_eq!(sub.text(), None);
        let resub = parse_line("@msg-id=resub :tmi.twitch.tv USERNOTICE #chan :5 months!").unwrap();
        assert_eq!(resub.text(), Some("5 months!"));

        let join = parse_line(":bob!bob@bob.tmi.twitch.tv JOIN #Chan").unwrap();
        assert_eq!(join.kind(), &MessageKind::Join { channel: "chan".into() });

        let ping = parse_line("PING :tmi.twitch.tv").unwrap();
        assert!(ping.is_ping());

        let welcome = parse_line(":tmi.twitch.tv 001 mybot :Welcome, GLHF!").unwrap();
        assert_eq!(
            welcome.kind(),
            &MessageKind::Raw {
                command: "001".into(),
                params: vec!["mybot".into(), "Welcome, GLHF!".into()],
            }
        );
    }

    #[test]
    fn test_malformed_lines() {
        assert_eq!(parse_line(""), Err(ParseError::EmptyLine));
        assert_eq!(parse_line("\r\n"), Err(ParseError::EmptyLine));
        assert!(matches!(
            parse_line("@a=b :src"),
            Err(ParseError::MissingCommand { .. })
        ));
        assert!(matches!(
            parse_line("PRIVMSG"),
            Err(ParseError::MissingParameter { parameter: "channel", .. })
        ));
        assert!(matches!(
            parse_line("PRIVMSG #chan"),
            Err(ParseError::MissingParameter { parameter: "text", .. })
        ));
        assert!(matches!(
            parse_line("@=x PRIVMSG #chan :hi"),
            Err(ParseError::MalformedTags(_))
        ));
        assert!(matches!(
            parse_line(": PRIVMSG #chan :hi"),
            Err(ParseError::MalformedSource(_))
        ));
        assert!(parse_line("JOIN #").is_err());
    }

    #[test]
    fn test_extra_spaces_are_tolerated() {
        let msg = parse_line(":a!a@a  PRIVMSG   #chan   :spaced  out").unwrap();
        assert_eq!(msg.text(), Some("spaced  out"));
    }

    #[test]
    fn test_round_trip_every_variant() {
        for line in [
            "@color=#FF0000;display-name=A\\sB :a!a@a.tmi.twitch.tv PRIVMSG #chan :hi :) ;x",
            "PRIVMSG #chan :",
            ":bob!bob@bob.tmi.twitch.tv WHISPER me :psst",
            ":tmi.twitch.tv NOTICE * :global",
            "@msg-id=slow_on :tmi.twitch.tv NOTICE #chan :slow",
            "@msg-id=raid :tmi.twitch.tv USERNOTICE #chan",
            "@msg-id=resub :tmi.twitch.tv USERNOTICE #chan :thanks",
            ":bob!bob@bob.tmi.twitch.tv JOIN #chan",
            ":bob!bob@bob.tmi.twitch.tv PART #chan",
            "@badges=moderator/1;mod=1 :tmi.twitch.tv USERSTATE #chan",
            "PING :tmi.twitch.tv",
            "PING",
            ":tmi.twitch.tv PONG tmi.twitch.tv :tmi.twitch.tv",
            ":tmi.twitch.tv 001 me :Welcome, GLHF!",
            ":tmi.twitch.tv CAP * ACK :twitch.tv/tags twitch.tv/commands",
            "RECONNECT",
        ] {
            round_trip(line);
        }
    }
}
