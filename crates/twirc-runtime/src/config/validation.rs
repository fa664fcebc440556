//! Configuration validation.

use twirc_core::{is_valid_name, normalize_channel};

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    CommandSettings, ConnectionSettings, LimitSettings, LogOutput, LoggingConfig,
    RateLimitSettings, ReconnectSettings, TransportKind, TwircConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &TwircConfig) -> ConfigResult<()> {
    validate_connection(&config.connection)?;
    validate_rate_limits(&config.rate_limits)?;
    validate_commands(&config.commands)?;
    validate_logging(&config.logging)?;
    Ok(())
}

fn validate_connection(connection: &ConnectionSettings) -> ConfigResult<()> {
    let nickname = connection.nickname.trim();
    if nickname.is_empty() {
        return Err(ConfigError::missing_field("connection.nickname"));
    }
    if nickname.contains(char::is_whitespace) {
        return Err(ConfigError::validation(format!(
            "Nickname must not contain whitespace: {nickname:?}"
        )));
    }

    match connection.transport {
        TransportKind::Tcp => {
            if connection.host.trim().is_empty() {
                return Err(ConfigError::missing_field("connection.host"));
            }
            if connection.port == 0 {
                return Err(ConfigError::InvalidPort(connection.port));
            }
        }
        TransportKind::Websocket => {
            let url = &connection.url;
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(ConfigError::invalid_url(url, "expected a ws:// or wss:// URL"));
            }
        }
    }

    if let Some(channel) = connection
        .channels
        .iter()
        .find(|c| !is_valid_name(&normalize_channel(c)))
    {
        return Err(ConfigError::validation(format!(
            "Invalid channel name: {channel:?}"
        )));
    }

    if connection.connect_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "Connect timeout must be greater than 0",
        ));
    }
    if connection.close_timeout_ms == 0 {
        return Err(ConfigError::validation("Close timeout must be greater than 0"));
    }
    if connection.inbound_buffer == 0 {
        return Err(ConfigError::validation(
            "Inbound buffer must hold at least one message",
        ));
    }

    validate_reconnect(&connection.reconnect)
}

fn validate_reconnect(reconnect: &ReconnectSettings) -> ConfigResult<()> {
    if reconnect.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial reconnect delay must be greater than 0",
        ));
    }

    if reconnect.max_delay_ms < reconnect.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max reconnect delay must be greater than or equal to initial delay",
        ));
    }

    if !(reconnect.multiplier >= 1.0) {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }

    Ok(())
}

fn validate_rate_limits(limits: &RateLimitSettings) -> ConfigResult<()> {
    validate_limit("rate_limits.channel", limits.channel)?;
    validate_limit("rate_limits.moderator", limits.moderator)?;
    validate_limit("rate_limits.whisper", limits.whisper)
}

fn validate_limit(name: &str, limit: LimitSettings) -> ConfigResult<()> {
    if limit.capacity == 0 {
        return Err(ConfigError::validation(format!(
            "{name}.capacity must be greater than 0"
        )));
    }
    if limit.window_ms == 0 {
        return Err(ConfigError::validation(format!(
            "{name}.window_ms must be greater than 0"
        )));
    }
    Ok(())
}

fn validate_commands(commands: &CommandSettings) -> ConfigResult<()> {
    if commands.prefix.is_empty() {
        return Err(ConfigError::validation("Command prefix must not be empty"));
    }
    if commands.prefix.contains(char::is_whitespace) {
        return Err(ConfigError::validation(
            "Command prefix must not contain whitespace",
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&TwircConfig::default()).is_ok());
    }

    #[test]
    fn test_nickname_rules() {
        let mut config = TwircConfig::default();
        config.connection.nickname = "  ".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "connection.nickname"
        ));

        config.connection.nickname = "two words".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_transport_endpoint() {
        let mut config = TwircConfig::default();
        config.connection.port = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidPort(0))
        ));

        // Port is irrelevant for websocket, the URL is not.
        config.connection.transport = TransportKind::Websocket;
        assert!(validate_config(&config).is_ok());
        config.connection.url = "https://example.com".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_reconnect_rules() {
        let mut config = TwircConfig::default();
        config.connection.reconnect.max_delay_ms = 10;
        assert!(validate_config(&config).is_err());

        let mut config = TwircConfig::default();
        config.connection.reconnect.multiplier = 0.5;
        assert!(validate_config(&config).is_err());

        let mut config = TwircConfig::default();
        config.connection.reconnect.multiplier = f64::NAN;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rate_limit_rules() {
        let mut config = TwircConfig::default();
        config.rate_limits.whisper.capacity = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("rate_limits.whisper.capacity"));
    }

    #[test]
    fn test_channel_and_prefix_rules() {
        let mut config = TwircConfig::default();
        config.connection.channels = vec!["ok".into(), "#".into()];
        assert!(validate_config(&config).is_err());

        config.connection.channels = vec!["ok\r\nPRIVMSG #other :x".into()];
        assert!(validate_config(&config).is_err());

        config.connection.channels = vec![" #Ok ".into()];
        assert!(validate_config(&config).is_ok());

        let mut config = TwircConfig::default();
        config.commands.prefix = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_file_output_needs_path() {
        let mut config = TwircConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { field }) if field == "logging.file_path"
        ));
    }
}
