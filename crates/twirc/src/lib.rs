//! # twirc
//!
//! An async Twitch chat client and bot framework.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   lines   ┌────────────┐  Message  ┌───────────────┐
//! │ Connection │──────────▶│   parser   │──────────▶│ CommandRouter │──▶ handlers
//! │  (login,   │           └────────────┘           └───────────────┘       │
//! │ reconnect) │                                     ▲                      │ send
//! │            │◀── rate-limited queues ◀── Outbox ◀─┼──────────────────────┘
//! └────────────┘   (channel, moderator,              │
//!                   whisper, control)        Scheduler (tasks, injection)
//! ```
//!
//! - [`core`]: message model, parser, encoder, permissions, the outbox seam
//! - [`framework`]: matchers, commands, the router, permission store, scheduler
//! - [`transport`]: connectors, the connection state machine, outbound queues
//! - [`runtime`]: configuration, logging and the [`Bot`](runtime::Bot)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use twirc::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bot = Bot::builder().build()?;
//!     bot.register(Command::text("ping", |ctx: CommandContext| async move {
//!         ctx.reply("pong")
//!     }));
//!     bot.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output
//! - `ws-client`: WebSocket transport (`wss://irc-ws.chat.twitch.tv`)

pub use twirc_core as core;
pub use twirc_framework as framework;
pub use twirc_runtime as runtime;
pub use twirc_transport as transport;

/// Commonly used types for building bots.
///
/// ```rust,ignore
/// use twirc::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use twirc_runtime::{Bot, BotBuilder, HookContext, TwircConfig};

    // Messages
    pub use twirc_core::{Message, MessageKind, Outbox, PermissionList, SendError};

    // Commands and tasks
    pub use twirc_framework::{
        Command, CommandContext, TaskContext, on_chat, on_command, on_regex, on_user_notice,
        on_whisper,
    };

    // Logging macros
    pub use twirc_runtime::prelude::*;
}
