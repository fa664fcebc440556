//! Permission tokens.
//!
//! A permission is a case-insensitive string token such as `commands.ban`.
//! A user holds a [`PermissionList`]; a command requires one. The user may
//! run the command when its list is a superset of the requirement.
//!
//! A few token shapes carry meaning:
//!
//! | Token | Meaning |
//! |-------|---------|
//! | [`GLOBAL_BYPASS`] | satisfies every requirement |
//! | `twirc.bypass.permission.local.<channel>` | satisfies requirements in that channel |
//! | `parent.<group>` | inherits the permissions of `<group>` |
//!
//! Group expansion happens in the permission store; this type is a plain set.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Token that satisfies every permission requirement.
pub const GLOBAL_BYPASS: &str = "twirc.bypass.permission";

/// Prefix of the per-channel bypass token.
pub const LOCAL_BYPASS_PREFIX: &str = "twirc.bypass.permission.local.";

/// Prefix of group membership tokens.
pub const GROUP_PREFIX: &str = "parent.";

/// Returns the bypass token for `channel`.
pub fn local_bypass(channel: &str) -> String {
    format!("{LOCAL_BYPASS_PREFIX}{}", crate::message::normalize_channel(channel))
}

/// Returns the membership token for `group`.
pub fn group_token(group: &str) -> String {
    format!("{GROUP_PREFIX}{}", normalize(group))
}

fn normalize(token: &str) -> String {
    token.trim().to_lowercase()
}

/// An unordered set of permission tokens with no duplicates.
///
/// Tokens are trimmed and lower-cased on insertion; empty tokens are
/// ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct PermissionList {
    tokens: BTreeSet<String>,
}

impl PermissionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token. Returns `false` if it was already present.
    pub fn add(&mut self, token: impl AsRef<str>) -> bool {
        let token = normalize(token.as_ref());
        if token.is_empty() {
            return false;
        }
        self.tokens.insert(token)
    }

    /// Builder-style [`add`](Self::add).
    pub fn with(mut self, token: impl AsRef<str>) -> Self {
        self.add(token);
        self
    }

    /// Removes a token. Returns `false` if it was absent.
    pub fn remove(&mut self, token: impl AsRef<str>) -> bool {
        self.tokens.remove(&normalize(token.as_ref()))
    }

    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(&normalize(token))
    }

    /// Returns true if every token in `required` is held.
    ///
    /// An empty requirement is always satisfied.
    pub fn has(&self, required: &PermissionList) -> bool {
        required.tokens.is_subset(&self.tokens)
    }

    /// Tokens of `required` that are not held.
    pub fn missing(&self, required: &PermissionList) -> PermissionList {
        Self {
            tokens: required.tokens.difference(&self.tokens).cloned().collect(),
        }
    }

    /// Returns true if these permissions bypass requirements, globally or
    /// for `channel` when local bypass is allowed.
    pub fn bypasses(&self, channel: Option<&str>, allow_local: bool) -> bool {
        if self.tokens.contains(GLOBAL_BYPASS) {
            return true;
        }
        match channel {
            Some(channel) if allow_local => self.tokens.contains(&local_bypass(channel)),
            _ => false,
        }
    }

    /// Names of the groups this list inherits from.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.tokens
            .iter()
            .filter_map(|t| t.strip_prefix(GROUP_PREFIX))
            .filter(|g| !g.is_empty())
    }

    /// Returns a new list holding the tokens of both.
    pub fn union(&self, other: &PermissionList) -> PermissionList {
        Self {
            tokens: self.tokens.union(&other.tokens).cloned().collect(),
        }
    }

    /// Adds every token of `other`.
    pub fn merge(&mut self, other: &PermissionList) {
        self.tokens.extend(other.tokens.iter().cloned());
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for PermissionList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = Self::new();
        for token in iter {
            list.add(token);
        }
        list
    }
}

impl From<Vec<String>> for PermissionList {
    fn from(tokens: Vec<String>) -> Self {
        tokens.into_iter().collect()
    }
}

impl From<PermissionList> for Vec<String> {
    fn from(list: PermissionList) -> Self {
        list.tokens.into_iter().collect()
    }
}

impl fmt::Display for PermissionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.iter().collect::<Vec<_>>().join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_is_idempotent_and_normalized() {
        let mut list = PermissionList::new();
        assert!(list.add("Commands.Ban"));
        assert!(!list.add("commands.ban"));
        assert!(!list.add("  "));
        assert_eq!(list.len(), 1);
        assert!(list.contains("COMMANDS.BAN"));
        assert!(list.remove("commands.ban"));
        assert!(!list.remove("commands.ban"));
    }

    #[test]
    fn test_has_and_missing() {
        let held: PermissionList = ["a", "b"].into_iter().collect();
        let empty = PermissionList::new();
        assert!(held.has(&empty));
        assert!(empty.has(&empty));
        assert!(held.has(&PermissionList::new().with("a")));

        let required: PermissionList = ["a", "c"].into_iter().collect();
        assert!(!held.has(&required));
        assert_eq!(held.missing(&required).iter().collect::<Vec<_>>(), ["c"]);
        assert!(held.union(&required).has(&required));
    }

    #[test]
    fn test_bypass_tokens() {
        let global = PermissionList::new().with(GLOBAL_BYPASS);
        assert!(global.bypasses(None, false));

        let local = PermissionList::new().with(local_bypass("#Chan"));
        assert!(local.bypasses(Some("chan"), true));
        assert!(!local.bypasses(Some("chan"), false));
        assert!(!local.bypasses(Some("other"), true));
        assert!(!local.bypasses(None, true));
    }

    #[test]
    fn test_groups() {
        let list = PermissionList::new()
            .with(group_token("Mods"))
            .with("parent.")
            .with("x");
        assert_eq!(list.groups().collect::<Vec<_>>(), ["mods"]);
    }

    #[test]
    fn test_serde_normalizes() {
        let list: PermissionList = serde_json::from_str(r#"["B", "a", "b"]"#).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(serde_json::to_string(&list).unwrap(), r#"["a","b"]"#);
    }
}
