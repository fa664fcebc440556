//! Matchers decide whether a message triggers a command.
//!
//! A [`Matcher`] inspects a [`Message`] and returns a [`MatchResult`]. On a
//! match it may hand back [`Captures`]: regex groups, or the arguments that
//! followed a command name. Captures travel to the handler inside its
//! [`CommandContext`](crate::CommandContext); the message itself is never
//! modified.
//!
//! Concrete matchers:
//!
//! - [`CommandMatcher`]: `!name arg arg` style commands
//! - [`RegexMatcher`]: a regular expression over the message text
//! - [`KindMatcher`]: any message of the given variants
//! - [`FnMatcher`]: an arbitrary closure
//!
//! # Example
//!
//! ```rust
//! use twirc_core::Message;
//! use twirc_framework::{CommandMatcher, MatchContext, Matcher};
//!
//! let matcher = CommandMatcher::new("so").alias("shoutout");
//! let msg = Message::chat("chan", "!shoutout someone").unwrap();
//!
//! let captures = matcher
//!     .matches(&msg, &MatchContext::new("!"))
//!     .into_captures()
//!     .unwrap();
//! assert_eq!(captures.args(), ["someone"]);
//! ```

use std::collections::HashMap;
use std::fmt;

use regex::Regex;
use twirc_core::{Message, MessageKind};

// =============================================================================
// Match results
// =============================================================================

/// Data extracted by a successful match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captures {
    groups: Vec<Option<String>>,
    named: HashMap<String, String>,
    args: Vec<String>,
    rest: Option<String>,
}

impl Captures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Positional regex group `index` (0 is the whole match).
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    /// Named regex group.
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// Whitespace separated arguments after a command name.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Text after the command name, spacing preserved.
    pub fn rest(&self) -> Option<&str> {
        self.rest.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.named.is_empty() && self.args.is_empty()
    }

    fn from_regex(regex: &Regex, caps: &regex::Captures<'_>) -> Self {
        let groups = caps
            .iter()
            .map(|g| g.map(|m| m.as_str().to_string()))
            .collect();
        let named = regex
            .capture_names()
            .flatten()
            .filter_map(|name| Some((name.to_string(), caps.name(name)?.as_str().to_string())))
            .collect();
        Self {
            groups,
            named,
            ..Self::default()
        }
    }

    fn from_arguments(rest: &str) -> Self {
        let rest = rest.trim();
        Self {
            args: rest.split_whitespace().map(str::to_string).collect(),
            rest: (!rest.is_empty()).then(|| rest.to_string()),
            ..Self::default()
        }
    }
}

/// Outcome of a [`Matcher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// The message does not trigger the command.
    NoMatch,
    /// The message triggers the command, with any captured data.
    Matched(Captures),
}

impl MatchResult {
    /// A match without captures.
    pub fn matched() -> Self {
        Self::Matched(Captures::default())
    }

    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    pub fn into_captures(self) -> Option<Captures> {
        match self {
            Self::Matched(c) => Some(c),
            Self::NoMatch => None,
        }
    }
}

impl From<bool> for MatchResult {
    fn from(matched: bool) -> Self {
        if matched { Self::matched() } else { Self::NoMatch }
    }
}

/// Router state visible to matchers.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext<'a> {
    /// The router's command prefix, e.g. `!`.
    pub prefix: &'a str,
}

impl<'a> MatchContext<'a> {
    pub fn new(prefix: &'a str) -> Self {
        Self { prefix }
    }
}

// =============================================================================
// Matcher trait
// =============================================================================

/// Decides whether a message triggers a command.
///
/// Matchers must be pure: the router may consult them in any order and
/// from any task.
pub trait Matcher: Send + Sync + 'static {
    fn matches(&self, message: &Message, ctx: &MatchContext<'_>) -> MatchResult;
}

/// Variant selector used by [`KindMatcher`] and [`RegexMatcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindFilter {
    Chat,
    Whisper,
    GlobalNotice,
    Notice,
    UserNotice,
    Join,
    Part,
    UserState,
    Ping,
    Pong,
    Raw,
}

impl KindFilter {
    pub fn of(kind: &MessageKind) -> Self {
        match kind {
            MessageKind::Chat(_) => Self::Chat,
            MessageKind::Whisper(_) => Self::Whisper,
            MessageKind::GlobalNotice(_) => Self::GlobalNotice,
            MessageKind::Notice(_) => Self::Notice,
            MessageKind::UserNotice(_) => Self::UserNotice,
            MessageKind::Join { .. } => Self::Join,
            MessageKind::Part { .. } => Self::Part,
            MessageKind::UserState { .. } => Self::UserState,
            MessageKind::Ping { .. } => Self::Ping,
            MessageKind::Pong { .. } => Self::Pong,
            MessageKind::Raw { .. } => Self::Raw,
        }
    }
}

const TEXT_KINDS: &[KindFilter] = &[KindFilter::Chat, KindFilter::Whisper];

// =============================================================================
// CommandMatcher
// =============================================================================

/// Matches `<prefix><name>` at the start of a chat or whisper text.
///
/// The name must be followed by whitespace or the end of the text, so
/// `!so` does not match `!sound`. Names compare case-insensitively. The
/// words after the name become [`Captures::args`].
#[derive(Debug, Clone)]
pub struct CommandMatcher {
    names: Vec<String>,
    prefix: Option<String>,
}

impl CommandMatcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            names: vec![name.into().to_lowercase()],
            prefix: None,
        }
    }

    /// Adds an alternative name.
    pub fn alias(mut self, name: impl Into<String>) -> Self {
        self.names.push(name.into().to_lowercase());
        self
    }

    /// Uses this prefix instead of the router's.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// The primary command name.
    pub fn name(&self) -> &str {
        &self.names[0]
    }
}

impl Matcher for CommandMatcher {
    fn matches(&self, message: &Message, ctx: &MatchContext<'_>) -> MatchResult {
        if !TEXT_KINDS.contains(&KindFilter::of(message.kind())) {
            return MatchResult::NoMatch;
        }
        let Some(text) = message.text() else {
            return MatchResult::NoMatch;
        };
        let prefix = self.prefix.as_deref().unwrap_or(ctx.prefix);
        let Some(body) = text.trim_start().strip_prefix(prefix) else {
            return MatchResult::NoMatch;
        };

        let (word, rest) = body
            .split_once(char::is_whitespace)
            .unwrap_or((body, ""));
        let word = word.to_lowercase();
        if self.names.iter().any(|n| *n == word) {
            MatchResult::Matched(Captures::from_arguments(rest))
        } else {
            MatchResult::NoMatch
        }
    }
}

// =============================================================================
// RegexMatcher
// =============================================================================

/// Matches a regular expression against the message text.
///
/// Only chat and whisper messages are considered unless [`on`](Self::on)
/// widens the set.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
    kinds: Vec<KindFilter>,
}

impl RegexMatcher {
    pub fn new(regex: Regex) -> Self {
        Self {
            regex,
            kinds: TEXT_KINDS.to_vec(),
        }
    }

    /// Compiles `pattern` into a matcher.
    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::new(Regex::new(pattern)?))
    }

    /// Restricts the matcher to the given variants.
    pub fn on(mut self, kinds: &[KindFilter]) -> Self {
        self.kinds = kinds.to_vec();
        self
    }
}

impl Matcher for RegexMatcher {
    fn matches(&self, message: &Message, _ctx: &MatchContext<'_>) -> MatchResult {
        if !self.kinds.contains(&KindFilter::of(message.kind())) {
            return MatchResult::NoMatch;
        }
        message
            .text()
            .and_then(|text| self.regex.captures(text))
            .map(|caps| MatchResult::Matched(Captures::from_regex(&self.regex, &caps)))
            .unwrap_or(MatchResult::NoMatch)
    }
}

// =============================================================================
// KindMatcher / FnMatcher
// =============================================================================

/// Matches every message of the listed variants.
#[derive(Debug, Clone)]
pub struct KindMatcher {
    kinds: Vec<KindFilter>,
}

impl KindMatcher {
    pub fn new(kinds: &[KindFilter]) -> Self {
        Self {
            kinds: kinds.to_vec(),
        }
    }
}

impl Matcher for KindMatcher {
    fn matches(&self, message: &Message, _ctx: &MatchContext<'_>) -> MatchResult {
        self.kinds.contains(&KindFilter::of(message.kind())).into()
    }
}

/// A matcher backed by a closure.
pub struct FnMatcher<F> {
    f: F,
}

impl<F> FnMatcher<F>
where
    F: Fn(&Message) -> MatchResult + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> fmt::Debug for FnMatcher<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMatcher").finish_non_exhaustive()
    }
}

impl<F> Matcher for FnMatcher<F>
where
    F: Fn(&Message) -> MatchResult + Send + Sync + 'static,
{
    fn matches(&self, message: &Message, _ctx: &MatchContext<'_>) -> MatchResult {
        (self.f)(message)
    }
}

// =============================================================================
// Builders
// =============================================================================

/// Creates a [`CommandMatcher`] for `name`.
pub fn on_command(name: impl Into<String>) -> CommandMatcher {
    CommandMatcher::new(name)
}

/// Creates a [`RegexMatcher`] for `pattern`.
pub fn on_regex(pattern: &str) -> Result<RegexMatcher, regex::Error> {
    RegexMatcher::pattern(pattern)
}

/// Matches every chat message.
pub fn on_chat() -> KindMatcher {
    KindMatcher::new(&[KindFilter::Chat])
}

/// Matches every whisper.
pub fn on_whisper() -> KindMatcher {
    KindMatcher::new(&[KindFilter::Whisper])
}

/// Matches channel events such as subscriptions and raids.
pub fn on_user_notice() -> KindMatcher {
    KindMatcher::new(&[KindFilter::UserNotice])
}

/// Creates a [`FnMatcher`] from a closure.
pub fn matcher_fn<F>(f: F) -> FnMatcher<F>
where
    F: Fn(&Message) -> MatchResult + Send + Sync + 'static,
{
    FnMatcher::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: MatchContext<'static> = MatchContext { prefix: "!" };

    fn chat(text: &str) -> Message {
        Message::chat("chan", text).unwrap()
    }

    #[test]
    fn test_command_matcher_requires_word_boundary() {
        let matcher = on_command("so");
        assert!(matcher.matches(&chat("!so"), &CTX).is_match());
        assert!(matcher.matches(&chat("  !SO  "), &CTX).is_match());
        assert!(!matcher.matches(&chat("!sound"), &CTX).is_match());
        assert!(!matcher.matches(&chat("so"), &CTX).is_match());
        assert!(!matcher.matches(&chat("?so"), &CTX).is_match());
    }

    #[test]
    fn test_command_matcher_captures_arguments() {
        let captures = on_command("ban")
            .matches(&chat("!ban  troll   being rude"), &CTX)
            .into_captures()
            .unwrap();
        assert_eq!(captures.args(), ["troll", "being", "rude"]);
        assert_eq!(captures.arg(0), Some("troll"));
        assert_eq!(captures.rest(), Some("troll   being rude"));

        let empty = on_command("ping").matches(&chat("!ping"), &CTX).into_captures().unwrap();
        assert!(empty.args().is_empty());
        assert_eq!(empty.rest(), None);
    }

    #[test]
    fn test_command_matcher_forced_prefix_and_alias() {
        let matcher = on_command("help").prefix("?").alias("h");
        assert!(matcher.matches(&chat("?h"), &CTX).is_match());
        assert!(!matcher.matches(&chat("!help"), &CTX).is_match());

        let whisper = Message::whisper("bot", "?help").unwrap();
        assert!(matcher.matches(&whisper, &CTX).is_match());

        let notice = Message::notice("chan", "?help").unwrap();
        assert!(!matcher.matches(&notice, &CTX).is_match());
    }

    #[test]
    fn test_regex_matcher_groups() {
        let matcher = on_regex(r"^hello (?P<who>\w+)").unwrap();
        let captures = matcher.matches(&chat("hello world"), &CTX).into_captures().unwrap();
        assert_eq!(captures.group(0), Some("hello world"));
        assert_eq!(captures.group(1), Some("world"));
        assert_eq!(captures.name("who"), Some("world"));
        assert!(!matcher.matches(&chat("goodbye"), &CTX).is_match());

        let sub = Message::user_notice("chan", Some("hello there".into())).unwrap();
        assert!(!matcher.matches(&sub, &CTX).is_match());
        let widened = on_regex("hello").unwrap().on(&[KindFilter::UserNotice]);
        assert!(widened.matches(&sub, &CTX).is_match());
    }

    #[test]
    fn test_kind_and_fn_matchers() {
        assert!(on_chat().matches(&chat("x"), &CTX).is_match());
        assert!(!on_whisper().matches(&chat("x"), &CTX).is_match());

        let long = matcher_fn(|m| m.text().is_some_and(|t| t.len() > 3).into());
        assert!(long.matches(&chat("long text"), &CTX).is_match());
        assert!(!long.matches(&chat("hi"), &CTX).is_match());
    }
}
