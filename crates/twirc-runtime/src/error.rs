//! Runtime error types.

use thiserror::Error;
use twirc_transport::ConnectionError;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can occur while building or running a bot.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The connection failed to open, or was lost for good.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// `run` was called on a bot that already ran.
    #[error("Bot is already running or has already run")]
    AlreadyRunning,

    /// The configured transport was not compiled in.
    #[error("Transport not available: {0}")]
    TransportUnavailable(String),

    /// A background task panicked or was aborted.
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
