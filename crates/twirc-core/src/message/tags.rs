//! IRCv3 message tags as sent by Twitch.
//!
//! Tags arrive as `@key=value;key=value` ahead of the source prefix. Values
//! are stored unescaped; [`Tags::encode`] applies the escaping again.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// `id:start-end,start-end` for a single emote in the `emotes` tag.
static EMOTE_SEGMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<id>[^:/]+):(?P<ranges>[0-9,\-]*)$").expect("emote segment pattern")
});

static EMOTE_RANGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<start>\d+)-(?P<end>\d+)$").expect("emote range pattern"));

/// A chat badge such as `moderator/1` or `subscriber/12`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Badge {
    /// Badge set name.
    pub name: String,
    /// Badge version within the set.
    pub version: String,
}

/// Location of an emote inside the message text, in character offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmoteRange {
    /// Emote identifier.
    pub id: String,
    /// First character of the emote (inclusive).
    pub start: usize,
    /// Last character of the emote (inclusive).
    pub end: usize,
}

/// Parsed message tags.
///
/// Keys are kept sorted so that equality and the encoded form do not depend
/// on the order the server sent them in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tags {
    entries: BTreeMap<String, String>,
}

impl Tags {
    /// Creates an empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the body of a tag prefix (without the leading `@`).
    pub fn parse(body: &str) -> ParseResult<Self> {
        if body.is_empty() {
            return Err(ParseError::MalformedTags(body.to_string()));
        }

        let mut entries = BTreeMap::new();
        for pair in body.split(';').filter(|p| !p.is_empty()) {
            let (key, value) = match pair.split_once('=') {
                Some((key, value)) => (key, unescape(value)),
                None => (pair, String::new()),
            };
            if key.is_empty() {
                return Err(ParseError::MalformedTags(body.to_string()));
            }
            entries.insert(key.to_string(), value);
        }

        Ok(Self { entries })
    }

    /// Encodes the tags without the leading `@`.
    pub fn encode(&self) -> String {
        self.entries
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{k}={}", escape(v))
                }
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Inserts or replaces a tag (builder style).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts or replaces a tag.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Returns the raw value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Returns the value for `key`, treating an empty value as absent.
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key).filter(|v| !v.is_empty())
    }

    /// Returns a comma separated tag value as a list.
    pub fn list(&self, key: &str) -> Vec<&str> {
        self.get_non_empty(key)
            .map(|v| v.split(',').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // =========================================================================
    // Typed accessors
    // =========================================================================

    /// Badges from the `badges` tag. Entries without a version are skipped.
    pub fn badges(&self) -> Vec<Badge> {
        parse_badges(self.list("badges"))
    }

    /// Badge metadata from the `badge-info` tag (e.g. subscription months).
    pub fn badge_info(&self) -> Vec<Badge> {
        parse_badges(self.list("badge-info"))
    }

    /// Returns true if the badge set `name` is present.
    pub fn has_badge(&self, name: &str) -> bool {
        self.badges().iter().any(|b| b.name == name)
    }

    /// Emote positions from the `emotes` tag.
    ///
    /// Segments or ranges that do not match the expected grammar are
    /// ignored rather than reported.
    pub fn emotes(&self) -> Vec<EmoteRange> {
        let Some(raw) = self.get_non_empty("emotes") else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for segment in raw.split('/') {
            let Some(caps) = EMOTE_SEGMENT.captures(segment) else {
                continue;
            };
            let id = &caps["id"];
            for range in caps["ranges"].split(',') {
                let Some(r) = EMOTE_RANGE.captures(range) else {
                    continue;
                };
                if let (Ok(start), Ok(end)) = (r["start"].parse(), r["end"].parse()) {
                    out.push(EmoteRange {
                        id: id.to_string(),
                        start,
                        end,
                    });
                }
            }
        }
        out.sort_by_key(|e| e.start);
        out
    }

    /// Cheered bits, if any.
    pub fn bits(&self) -> Option<u64> {
        self.get_non_empty("bits").and_then(|b| b.parse().ok())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.get_non_empty("display-name")
    }

    pub fn color(&self) -> Option<&str> {
        self.get_non_empty("color")
    }

    /// The unique message id (`id` tag).
    pub fn message_id(&self) -> Option<&str> {
        self.get_non_empty("id")
    }

    /// The notice kind (`msg-id` tag) on NOTICE and USERNOTICE.
    pub fn notice_id(&self) -> Option<&str> {
        self.get_non_empty("msg-id")
    }

    pub fn user_id(&self) -> Option<&str> {
        self.get_non_empty("user-id")
    }

    /// Returns true if the `mod` tag is set to `1`.
    pub fn is_mod(&self) -> bool {
        self.get("mod") == Some("1")
    }

    /// Server timestamp from the `tmi-sent-ts` tag.
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        let millis: i64 = self.get_non_empty("tmi-sent-ts")?.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

impl fmt::Display for Tags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Tags {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn parse_badges(items: Vec<&str>) -> Vec<Badge> {
    items
        .into_iter()
        .filter_map(|item| {
            let (name, version) = item.split_once('/')?;
            Some(Badge {
                name: name.to_string(),
                version: version.to_string(),
            })
        })
        .collect()
}

/// Reverses IRCv3 tag value escaping.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            // A trailing lone backslash is dropped.
            None => {}
        }
    }
    out
}

/// Applies IRCv3 tag value escaping.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}
