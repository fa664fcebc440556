//! Echo Bot Example
//!
//! Joins the given channels and answers a handful of commands:
//!
//! ```text
//! !echo <text>            repeat <text>
//! !ping                   pong
//! !help                   list commands
//! !whoami                 sender, display name and badges
//! !grant <user> <token>   needs `echo.admin`
//! ```
//!
//! # Usage
//!
//! ```bash
//! # Anonymous, read-only
//! cargo run --package echo-bot -- --channel somechannel
//!
//! # Logged in, with a config file for everything else
//! cargo run --package echo-bot -- --config twirc.toml --nickname mybot --token $TOKEN
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use twirc::prelude::*;
use twirc::runtime::config::{ConfigLoader, TransportKind};

#[derive(Debug, Parser)]
#[command(version, about = "A simple echo bot for Twitch chat")]
struct Args {
    /// Configuration file (TOML, or YAML with the `yaml-config` feature).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Channel to join. May be repeated.
    #[arg(short = 'j', long = "channel")]
    channels: Vec<String>,

    /// Login name. Without one the bot logs in anonymously.
    #[arg(short, long)]
    nickname: Option<String>,

    /// OAuth token for the login name.
    #[arg(short, long)]
    token: Option<String>,

    /// Connect over WebSocket instead of TCP.
    #[arg(long)]
    websocket: bool,

    /// Post a reminder to every channel at this interval, in seconds.
    #[arg(long)]
    announce: Option<u64>,
}

// ============================================================================
// Command Handlers
// ============================================================================

async fn echo(ctx: CommandContext) -> Result<(), SendError> {
    let text = ctx.captures().rest().unwrap_or_default().trim().to_string();
    if text.is_empty() {
        return ctx.reply("Usage: !echo <text>");
    }
    ctx.reply(text)
}

async fn ping(ctx: CommandContext) -> Result<(), SendError> {
    ctx.reply("Pong!")
}

async fn help(ctx: CommandContext) -> Result<(), SendError> {
    ctx.reply("Commands: !echo <text>, !ping, !whoami, !help")
}

async fn whoami(ctx: CommandContext) -> Result<(), SendError> {
    let message = ctx.message();
    let name = message.sender_display_name().unwrap_or("someone");
    let badges: Vec<String> = message
        .tags()
        .badges()
        .iter()
        .map(|b| b.name.clone())
        .collect();
    let badges = if badges.is_empty() {
        "no badges".to_string()
    } else {
        badges.join(", ")
    };
    ctx.reply(format!("You are {name} ({badges})"))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if let Some(path) = &args.config {
        loader = loader.file(path);
    }
    let mut config = loader.load().context("loading configuration")?;

    // Command-line flags win over files and environment.
    config.connection.channels.extend(args.channels);
    if let Some(nickname) = args.nickname {
        config.connection.nickname = nickname;
    }
    if args.token.is_some() {
        config.connection.token = args.token;
    }
    if args.websocket {
        config.connection.transport = TransportKind::Websocket;
    }

    let bot = Arc::new(
        Bot::builder()
            .config(config)
            .on_permission_denied(|message, command, missing| {
                info!(%command, %missing, sender = ?message.sender(), "Permission denied");
            })
            .build()
            .context("building bot")?,
    );

    bot.register(Command::text("echo", echo).description("Repeat the given text"));
    bot.register(Command::text("ping", ping));
    bot.register(Command::new("help", on_command("help").alias("commands"), help));
    bot.register(Command::text("whoami", whoami));

    let permissions = Arc::clone(bot.permissions());
    bot.register(
        Command::text("grant", move |ctx: CommandContext| {
            let permissions = Arc::clone(&permissions);
            async move {
                let (Some(user), Some(token)) = (ctx.captures().arg(0), ctx.captures().arg(1))
                else {
                    return ctx.reply("Usage: !grant <user> <token>");
                };
                if permissions.grant(user, token) {
                    ctx.reply(format!("Granted {token} to {user}"))
                } else {
                    ctx.reply(format!("{user} already has {token}"))
                }
            }
        })
        .require("echo.admin"),
    );

    bot.on_chat_message(|ctx: HookContext| async move {
        if let Some(message) = ctx.message() {
            info!(
                channel = message.channel().unwrap_or_default(),
                sender = message.sender_display_name().unwrap_or("?"),
                text = message.text().unwrap_or_default(),
                "Chat"
            );
        }
    });

    bot.on_start(|_ctx: HookContext| async {
        info!("Echo bot is up");
    });

    if let Some(seconds) = args.announce {
        let channels = bot.config().connection.channels.clone();
        bot.every(Duration::from_secs(seconds), move |ctx: TaskContext| {
            let channels = channels.clone();
            async move {
                for channel in &channels {
                    if let Err(e) = ctx.outbox().say(channel, "Type !help for commands") {
                        warn!(%channel, error = %e, "Failed to queue reminder");
                    }
                }
            }
        });
    }

    bot.run().await?;
    Ok(())
}
