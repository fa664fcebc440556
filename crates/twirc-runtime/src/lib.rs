//! # twirc Runtime
//!
//! Turns the lower crates into a running bot:
//!
//! - [`config`]: layered configuration (files, `TWIRC_*` environment,
//!   programmatic base) with validation
//! - [`logging`]: `tracing-subscriber` setup driven by that configuration
//! - [`Bot`]: one connection wired to the command router, the scheduler,
//!   the rate-limited outbound queues and lifecycle [`hooks`]
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output
//! - `ws-client`: the WebSocket transport
//!
//! ```rust,ignore
//! use twirc_runtime::Bot;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let bot = Bot::builder().build()?;
//!     bot.run().await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod config;
pub mod error;
pub mod hooks;
pub mod logging;

pub use bot::{Bot, BotBuilder, wait_for_shutdown};
pub use config::{ConfigError, ConfigLoader, ConfigResult, TwircConfig, validate_config};
pub use error::{RuntimeError, RuntimeResult};
pub use hooks::{Hook, HookContext, HookKind};
pub use logging::{LoggingBuilder, SpanEvents};

pub use tracing;
pub use tracing_subscriber;

/// Logging macros, re-exported so bots need no direct `tracing` dependency.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
