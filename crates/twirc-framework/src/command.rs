//! Command registration records.

use std::fmt;
use std::sync::Arc;

use twirc_core::PermissionList;

use crate::handler::{BoxedHandler, Handler, into_handler};
use crate::matcher::{CommandMatcher, Matcher};

/// Identifies a registered command. Ids grow with registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(pub(crate) u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cmd#{}", self.0)
    }
}

/// A matcher, a handler, and the permissions needed to run it.
///
/// Built with the methods below and handed to
/// [`CommandRouter::register`](crate::CommandRouter::register); it cannot be
/// changed afterwards.
///
/// ```rust,ignore
/// let ban = Command::text("ban", ban_handler)
///     .require("commands.ban")
///     .description("Ban a user from the channel");
/// ```
#[derive(Clone)]
pub struct Command {
    pub(crate) name: Arc<str>,
    pub(crate) matcher: Arc<dyn Matcher>,
    pub(crate) handler: BoxedHandler,
    pub(crate) required: PermissionList,
    pub(crate) local_bypass: bool,
    pub(crate) description: Option<String>,
}

impl Command {
    /// Creates a command with a custom matcher.
    pub fn new<M, H>(name: impl Into<String>, matcher: M, handler: H) -> Self
    where
        M: Matcher,
        H: Handler,
    {
        Self {
            name: Arc::from(name.into()),
            matcher: Arc::new(matcher),
            handler: into_handler(handler),
            required: PermissionList::new(),
            local_bypass: true,
            description: None,
        }
    }

    /// Creates a `<prefix><name>` text command.
    pub fn text<H: Handler>(name: impl Into<String>, handler: H) -> Self {
        let name = name.into();
        Self::new(name.clone(), CommandMatcher::new(name), handler)
    }

    /// Adds a required permission token.
    pub fn require(mut self, token: impl AsRef<str>) -> Self {
        self.required.add(token);
        self
    }

    /// Replaces the required permissions.
    pub fn permissions(mut self, required: PermissionList) -> Self {
        self.required = required;
        self
    }

    /// Whether the per-channel bypass token applies. Defaults to `true`.
    pub fn local_bypass(mut self, allowed: bool) -> Self {
        self.local_bypass = allowed;
        self
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn required(&self) -> &PermissionList {
        &self.required
    }

    pub fn get_description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("local_bypass", &self.local_bypass)
            .finish_non_exhaustive()
    }
}
