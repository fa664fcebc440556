//! Configuration for twirc bots.
//!
//! Layered loading from files and environment with figment, a serde schema
//! with per-field defaults, and validation that runs before a bot is built.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile};
pub use schema::{
    CommandSettings, ConnectionSettings, LimitSettings, LogFormat, LogLevel, LogOutput,
    LogRotation, LoggingConfig, RateLimitSettings, ReconnectSettings, SchedulerSettings,
    SpanEventConfig, TransportKind, TwircConfig,
};
pub use validation::validate_config;
