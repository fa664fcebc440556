//! # twirc Framework
//!
//! Bot-level building blocks on top of [`twirc_core`]:
//!
//! - [`Matcher`] implementations that decide which messages trigger a command
//! - [`Command`] records and the [`CommandRouter`] that dispatches them under
//!   permission checks
//! - [`PermissionStore`] for per-user and per-group permissions
//! - [`Scheduler`] for one-shot and periodic tasks
//!
//! Nothing here touches the network. Everything that leaves the bot goes
//! through a [`twirc_core::Outbox`].
//!
//! ```text
//! Message ──▶ CommandRouter ──▶ Matcher? ──▶ permitted? ──▶ Handler ──▶ Outbox
//!                                                                        ▲
//! Scheduler ──▶ Task ────────────────────────────────────────────────────┘
//! ```

pub mod command;
pub mod context;
pub mod error;
pub mod handler;
pub mod matcher;
pub mod permission_store;
pub mod router;
pub mod scheduler;

pub use command::{Command, CommandId};
pub use context::CommandContext;
pub use error::{HandlerError, HandlerResult, SchedulerError, SchedulerResult};
pub use handler::{BoxFuture, BoxedHandler, Handler, IntoHandlerResult, into_handler};
pub use matcher::{
    Captures, CommandMatcher, FnMatcher, KindFilter, KindMatcher, MatchContext, MatchResult,
    Matcher, RegexMatcher, matcher_fn, on_chat, on_command, on_regex, on_user_notice, on_whisper,
};
pub use permission_store::{PermissionSnapshot, PermissionStore};
pub use router::{CommandRouter, DEFAULT_PREFIX, DeniedHook, DispatchReport, UnknownCommandPolicy};
pub use scheduler::{Injector, RunReport, Scheduler, Task, TaskContext, TaskId};
