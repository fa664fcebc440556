//! Command router.
//!
//! The [`CommandRouter`] holds the registered [`Command`]s and runs them
//! against inbound messages:
//!
//! 1. Commands are consulted in registration order
//! 2. Every command whose matcher accepts the message is a candidate, so one
//!    message can fire several commands
//! 3. A candidate runs only if the sender's resolved permissions cover its
//!    requirement (or a bypass token applies); otherwise it is skipped
//!    silently
//! 4. Handlers run one after another; an error or panic in one is logged and
//!    dispatch moves on to the next
//!
//! The sender's permissions are resolved once per message, so every check
//! for that message sees the same snapshot even if a handler changes the
//! store mid-dispatch.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, debug_span, error, warn};
use twirc_core::{Message, PermissionList, SharedOutbox};

use crate::command::{Command, CommandId};
use crate::context::CommandContext;
use crate::error::HandlerError;
use crate::matcher::{MatchContext, MatchResult};
use crate::permission_store::PermissionStore;

/// Default command prefix.
pub const DEFAULT_PREFIX: &str = "!";

/// What to do with prefixed text that no command matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownCommandPolicy {
    /// Do nothing.
    #[default]
    Ignore,
    /// Log the attempt.
    Warn,
    /// Reply with "Unknown command '<word>'".
    Reply,
}

/// Callback invoked when a matched command is skipped for lack of
/// permissions. Receives the message, the command name, and the missing
/// tokens.
pub type DeniedHook = Arc<dyn Fn(&Message, &str, &PermissionList) + Send + Sync>;

/// Summary of one [`CommandRouter::dispatch`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Commands whose matcher accepted the message.
    pub matched: usize,
    /// Commands whose handler ran to completion without error.
    pub succeeded: usize,
    /// Commands skipped for lack of permissions.
    pub denied: usize,
    /// Handlers that failed or panicked.
    pub failed: usize,
}

struct Registered {
    id: CommandId,
    command: Command,
}

/// Ordered command registry and dispatcher.
///
/// Registration takes `&self`, so commands can be added while the bot runs.
/// A dispatch works on the command list as it was when the dispatch began.
pub struct CommandRouter {
    commands: RwLock<Vec<Arc<Registered>>>,
    next_id: AtomicU64,
    prefix: String,
    unknown: UnknownCommandPolicy,
    permissions: Arc<PermissionStore>,
    on_denied: Option<DeniedHook>,
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self::new(Arc::new(PermissionStore::new()))
    }
}

impl CommandRouter {
    /// Creates a router resolving permissions from `permissions`.
    pub fn new(permissions: Arc<PermissionStore>) -> Self {
        Self {
            commands: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            prefix: DEFAULT_PREFIX.to_string(),
            unknown: UnknownCommandPolicy::default(),
            permissions,
            on_denied: None,
        }
    }

    /// Sets the default command prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_unknown_policy(mut self, policy: UnknownCommandPolicy) -> Self {
        self.unknown = policy;
        self
    }

    /// Installs a permission-denied callback. Denials are silent otherwise.
    pub fn on_permission_denied<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Message, &str, &PermissionList) + Send + Sync + 'static,
    {
        self.on_denied = Some(Arc::new(hook));
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn permissions(&self) -> &Arc<PermissionStore> {
        &self.permissions
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Appends a command. It is consulted after every earlier command.
    pub fn register(&self, command: Command) -> CommandId {
        let id = CommandId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!(%id, name = %command.name, "Registering command");
        self.commands.write().push(Arc::new(Registered { id, command }));
        id
    }

    /// Removes a command. Returns `false` if the id is unknown.
    pub fn unregister(&self, id: CommandId) -> bool {
        let mut commands = self.commands.write();
        let before = commands.len();
        commands.retain(|r| r.id != id);
        before != commands.len()
    }

    /// Names of the registered commands in registration order.
    pub fn command_names(&self) -> Vec<String> {
        self.commands
            .read()
            .iter()
            .map(|r| r.command.name.to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.commands.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.read().is_empty()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Runs every matching, permitted command for `message`.
    ///
    /// Never fails: handler errors and panics are logged and counted in the
    /// returned report.
    pub async fn dispatch(&self, message: Arc<Message>, outbox: &SharedOutbox) -> DispatchReport {
        let span = debug_span!("dispatch", kind = message.kind().name());
        self.run_commands(message, outbox).instrument(span).await
    }

    async fn run_commands(&self, message: Arc<Message>, outbox: &SharedOutbox) -> DispatchReport {
        let commands: Vec<Arc<Registered>> = self.commands.read().clone();
        let held = self.permissions.resolve(message.sender());
        let ctx = MatchContext::new(&self.prefix);
        let mut report = DispatchReport::default();

        for registered in &commands {
            let command = &registered.command;
            let MatchResult::Matched(captures) = command.matcher.matches(&message, &ctx) else {
                continue;
            };
            report.matched += 1;

            let bypass = held.bypasses(message.channel(), command.local_bypass);
            if !bypass && !held.has(&command.required) {
                report.denied += 1;
                let missing = held.missing(&command.required);
                debug!(command = %command.name, %missing, "Permission denied");
                if let Some(hook) = &self.on_denied {
                    hook(&message, &command.name, &missing);
                }
                continue;
            }

            let context = CommandContext::new(
                Arc::clone(&message),
                captures,
                held.clone(),
                Arc::clone(&command.name),
                Arc::clone(outbox),
            );
            let handler = Arc::clone(&command.handler);
            let outcome = std::panic::AssertUnwindSafe(async move { handler.call(context).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));

            match outcome {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(command = %command.name, id = %registered.id, error = %e, "Command handler failed");
                }
            }
        }

        if report.matched == 0 {
            self.handle_unknown(&message, outbox);
        }
        report
    }

    fn handle_unknown(&self, message: &Message, outbox: &SharedOutbox) {
        if self.unknown == UnknownCommandPolicy::Ignore
            || !(message.is_chat() || message.as_whisper().is_some())
        {
            return;
        }
        let Some(word) = message
            .text()
            .and_then(|t| t.trim_start().strip_prefix(self.prefix.as_str()))
            .and_then(|body| body.split_whitespace().next())
        else {
            return;
        };

        match self.unknown {
            UnknownCommandPolicy::Warn => {
                warn!(command = word, sender = ?message.sender(), "Unknown command");
            }
            UnknownCommandPolicy::Reply => {
                if let Some(reply) = message.reply(format!("Unknown command '{word}'")) {
                    if let Err(e) = outbox.send(reply) {
                        warn!(error = %e, "Failed to send unknown command reply");
                    }
                }
            }
            UnknownCommandPolicy::Ignore => {}
        }
    }
}

impl std::fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRouter")
            .field("commands", &self.len())
            .field("prefix", &self.prefix)
            .field("unknown", &self.unknown)
            .finish()
    }
}
