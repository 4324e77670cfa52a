use super::{
    types::{Config, DatabaseBackend},
    ConfigError,
};

/// Longest getUpdates timeout accepted by the Bot API.
const MAX_POLL_TIMEOUT_SECS: u64 = 50;

/// Validate configuration
/// Currently validates:
/// - Telegram token is present and the admin group id is set
/// - Poll timeout fits the Bot API limit
/// - Server port is not 0
/// - PostgreSQL backend has a URL and at least one connection
/// - Read retries make at least one attempt
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "telegram.bot_token cannot be empty".to_string(),
        ));
    }

    if config.telegram.admin_group_id == 0 {
        return Err(ConfigError::ValidationError(
            "telegram.admin_group_id must be set".to_string(),
        ));
    }

    if config.telegram.poll_timeout_secs > MAX_POLL_TIMEOUT_SECS {
        return Err(ConfigError::ValidationError(format!(
            "telegram.poll_timeout_secs cannot exceed {}",
            MAX_POLL_TIMEOUT_SECS
        )));
    }

    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    match config.database.backend {
        DatabaseBackend::Sqlite => {
            if config.database.path.as_os_str().is_empty() {
                return Err(ConfigError::ValidationError(
                    "database.path cannot be empty".to_string(),
                ));
            }
        }
        DatabaseBackend::Postgres => {
            if config.database.url.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::ValidationError(
                    "database.url is required when database.backend = \"postgres\"".to_string(),
                ));
            }
            if config.database.max_connections == 0 {
                return Err(ConfigError::ValidationError(
                    "database.max_connections must be at least 1".to_string(),
                ));
            }
        }
    }

    if config.database.read_retry_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "database.read_retry_attempts must be at least 1".to_string(),
        ));
    }

    Ok(())
}
