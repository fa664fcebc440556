//! The `:nick!user@host` source prefix.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Identity of whoever sent a line: a user or the server itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    /// Nickname, or the server name for server-originated lines.
    pub name: String,
    /// The `user` part of `nick!user@host`.
    pub user: Option<String>,
    /// The `host` part of `nick!user@host`.
    pub host: Option<String>,
}

impl Source {
    /// Creates a source with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            user: None,
            host: None,
        }
    }

    /// Creates the `nick!nick@nick.tmi.twitch.tv` form Twitch uses for users.
    pub fn user(nick: impl Into<String>) -> Self {
        let nick = nick.into();
        Self {
            user: Some(nick.clone()),
            host: Some(format!("{nick}.tmi.twitch.tv")),
            name: nick,
        }
    }

    /// Parses a prefix body (without the leading `:`).
    pub fn parse(prefix: &str) -> ParseResult<Self> {
        if prefix.is_empty() {
            return Err(ParseError::MalformedSource(prefix.to_string()));
        }

        let (rest, host) = match prefix.split_once('@') {
            Some((rest, host)) => (rest, Some(host.to_string())),
            None => (prefix, None),
        };
        let (name, user) = match rest.split_once('!') {
            Some((name, user)) => (name, Some(user.to_string())),
            None => (rest, None),
        };
        if name.is_empty() {
            return Err(ParseError::MalformedSource(prefix.to_string()));
        }

        Ok(Self {
            name: name.to_string(),
            user,
            host,
        })
    }

    /// The nickname (or server name).
    pub fn nick(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(user) = &self.user {
            write!(f, "!{user}")?;
        }
        if let Some(host) = &self.host {
            write!(f, "@{host}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_prefix() {
        let src = Source::parse("ronni!ronni@ronni.tmi.twitch.tv").unwrap();
        assert_eq!(src.nick(), "ronni");
        assert_eq!(src.user.as_deref(), Some("ronni"));
        assert_eq!(src.host.as_deref(), Some("ronni.tmi.twitch.tv"));
        assert_eq!(src, Source::user("ronni"));
        assert_eq!(src.to_string(), "ronni!ronni@ronni.tmi.twitch.tv");
    }

    #[test]
    fn test_parse_server_prefix() {
        let src = Source::parse("tmi.twitch.tv").unwrap();
        assert_eq!(src.nick(), "tmi.twitch.tv");
        assert!(src.user.is_none());
        assert!(src.host.is_none());
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(Source::parse("").is_err());
        assert!(Source::parse("!user@host").is_err());
    }
}
