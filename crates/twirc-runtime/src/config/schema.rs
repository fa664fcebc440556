//! Configuration schema definitions.
//!
//! ```toml
//! [connection]
//! nickname = "mybot"
//! token = "oauth:..."
//! channels = ["somechannel"]
//!
//! [connection.reconnect]
//! max_retries = 10
//!
//! [rate_limits.channel]
//! capacity = 20
//! window_ms = 30000
//!
//! [commands]
//! prefix = "!"
//! unknown_command = "reply"
//!
//! [logging]
//! level = "debug"
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use twirc_framework::{DEFAULT_PREFIX, PermissionSnapshot, UnknownCommandPolicy};
use twirc_transport::{
    ConnectionConfig, DEFAULT_CAPABILITIES, RateLimit, RateLimits, ReconnectPolicy,
};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TwircConfig {
    #[serde(default)]
    pub connection: ConnectionSettings,

    #[serde(default)]
    pub rate_limits: RateLimitSettings,

    #[serde(default)]
    pub commands: CommandSettings,

    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Initial permission store contents.
    #[serde(default)]
    pub permissions: PermissionSnapshot,

    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Connection
// =============================================================================

/// Which transport to dial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Websocket,
}

/// Connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Chat server host (TCP).
    #[serde(default = "default_host")]
    pub host: String,

    /// Chat server port (TCP).
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub transport: TransportKind,

    /// Endpoint for the WebSocket transport.
    #[serde(default = "default_url")]
    pub url: String,

    /// Login name. The default is an anonymous read-only login.
    #[serde(default = "default_nickname")]
    pub nickname: String,

    /// OAuth token. `oauth:` is added when missing.
    #[serde(default)]
    pub token: Option<String>,

    /// Channels to join after login.
    #[serde(default)]
    pub channels: Vec<String>,

    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,

    /// Capacity of the inbound message buffer between the reader and the
    /// dispatch loop.
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,

    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportKind::default(),
            url: default_url(),
            nickname: default_nickname(),
            token: None,
            channels: Vec::new(),
            capabilities: default_capabilities(),
            connect_timeout_ms: default_connect_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            inbound_buffer: default_inbound_buffer(),
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl ConnectionSettings {
    /// Converts to the transport-level connection config.
    pub fn to_connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            nickname: self.nickname.clone(),
            token: self.token.clone(),
            capabilities: self.capabilities.clone(),
            channels: self.channels.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
            reconnect: self.reconnect.to_policy(),
        }
    }
}

fn default_host() -> String {
    "irc.chat.twitch.tv".to_string()
}

fn default_port() -> u16 {
    6667
}

fn default_url() -> String {
    "wss://irc-ws.chat.twitch.tv:443".to_string()
}

fn default_nickname() -> String {
    "justinfan12345".to_string()
}

fn default_capabilities() -> Vec<String> {
    DEFAULT_CAPABILITIES.iter().map(|c| c.to_string()).collect()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_close_timeout_ms() -> u64 {
    2_000
}

fn default_inbound_buffer() -> usize {
    256
}

/// Reconnect settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of attempts. Absent means unbounded.
    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: None,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl ReconnectSettings {
    pub fn to_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            enabled: self.enabled,
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

// =============================================================================
// Rate limits
// =============================================================================

/// One queue's limit: `capacity` sends per `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSettings {
    pub capacity: usize,
    pub window_ms: u64,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            capacity: 1,
            window_ms: 3_000,
        }
    }
}

impl LimitSettings {
    pub fn to_rate_limit(self) -> RateLimit {
        RateLimit::new(self.capacity, Duration::from_millis(self.window_ms))
    }
}

/// Per-queue limits. Control lines are never limited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default)]
    pub channel: LimitSettings,

    /// Channels where the bot is moderator, VIP or broadcaster.
    #[serde(default)]
    pub moderator: LimitSettings,

    #[serde(default)]
    pub whisper: LimitSettings,
}

impl RateLimitSettings {
    pub fn to_rate_limits(&self) -> RateLimits {
        RateLimits {
            channel: self.channel.to_rate_limit(),
            moderator: self.moderator.to_rate_limit(),
            whisper: self.whisper.to_rate_limit(),
        }
    }
}

// =============================================================================
// Commands and scheduler
// =============================================================================

/// Command router settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSettings {
    #[serde(default = "default_prefix")]
    pub prefix: String,

    #[serde(default)]
    pub unknown_command: UnknownCommandPolicy,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            unknown_command: UnknownCommandPolicy::default(),
        }
    }
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

/// Scheduler settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Disable a task after this many consecutive failures. Absent means
    /// never.
    #[serde(default)]
    pub max_consecutive_failures: Option<u32>,
}

// =============================================================================
// Logging
// =============================================================================

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Log file rotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events to log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file for `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Per-target levels, e.g. `twirc_transport = "trace"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line in log output.
    #[serde(default)]
    pub file_location: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_convert() {
        let config = TwircConfig::default();
        let connection = config.connection.to_connection_config();
        assert_eq!(connection.nickname, "justinfan12345");
        assert_eq!(connection.capabilities.len(), 3);
        assert_eq!(connection.connect_timeout, Duration::from_secs(10));
        assert!(connection.reconnect.enabled);
        assert_eq!(connection.reconnect.max_retries, None);

        let limits = config.rate_limits.to_rate_limits();
        assert_eq!(limits.channel, RateLimit::new(1, Duration::from_secs(3)));
        assert_eq!(limits, RateLimits::default());
    }

    #[test]
    fn test_partial_sections_use_field_defaults() {
        use figment::Figment;
        use figment::providers::{Format, Toml};

        let config: TwircConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [connection]
                nickname = "mybot"
                channels = ["a", "b"]

                [connection.reconnect]
                max_retries = 3

                [rate_limits.moderator]
                capacity = 100
                window_ms = 30000

                [commands]
                unknown_command = "reply"
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(config.connection.nickname, "mybot");
        assert_eq!(config.connection.port, 6667);
        assert_eq!(config.connection.channels, vec!["a", "b"]);
        assert_eq!(config.connection.reconnect.max_retries, Some(3));
        assert!(config.connection.reconnect.enabled);
        assert_eq!(config.rate_limits.moderator.capacity, 100);
        assert_eq!(config.rate_limits.channel, LimitSettings::default());
        assert_eq!(config.commands.prefix, "!");
        assert_eq!(config.commands.unknown_command, UnknownCommandPolicy::Reply);
    }
}
