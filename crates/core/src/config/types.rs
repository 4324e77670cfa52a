use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::ticket::RetryPolicy;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub relay: RelayConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Telegram bot configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    /// Bot API token.
    pub bot_token: String,
    /// Forum-enabled supergroup where ticket topics are created.
    pub admin_group_id: i64,
    /// Bot API base URL (override for local Bot API servers).
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Long-poll timeout for getUpdates.
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,
    /// Delay before restarting polling after a failure.
    #[serde(default = "default_restart_delay")]
    pub restart_delay_secs: u64,
}

fn default_api_base_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_poll_timeout() -> u64 {
    30
}

fn default_restart_delay() -> u64 {
    5
}

/// Which store backend to use
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseBackend {
    /// Embedded single-file database.
    #[default]
    Sqlite,
    /// Networked relational database.
    Postgres,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub backend: DatabaseBackend,
    /// SQLite database file (backend = "sqlite").
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Connection URL (backend = "postgres").
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Attempts for read-only queries, including the first.
    #[serde(default = "default_read_retry_attempts")]
    pub read_retry_attempts: u32,
    #[serde(default = "default_read_retry_backoff")]
    pub read_retry_backoff_ms: u64,
}

impl DatabaseConfig {
    /// Retry policy for store reads.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.read_retry_attempts,
            Duration::from_millis(self.read_retry_backoff_ms),
        )
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: DatabaseBackend::default(),
            path: default_db_path(),
            url: None,
            max_connections: default_max_connections(),
            read_retry_attempts: default_read_retry_attempts(),
            read_retry_backoff_ms: default_read_retry_backoff(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("concierge.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_read_retry_attempts() -> u32 {
    3
}

fn default_read_retry_backoff() -> u64 {
    100
}

/// Who may reopen a resolved ticket
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResolvedReopenPolicy {
    /// Resolved is terminal.
    Disabled,
    /// Only admins (from the ticket channel) may reopen.
    #[default]
    AdminOnly,
    /// Users and admins may reopen.
    Anyone,
}

/// Ticket lifecycle configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LifecycleConfig {
    #[serde(default)]
    pub resolved_reopen: ResolvedReopenPolicy,
}

/// Relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Seconds an idle per-conversation worker waits before exiting.
    #[serde(default = "default_worker_idle")]
    pub worker_idle_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            worker_idle_secs: default_worker_idle(),
        }
    }
}

fn default_worker_idle() -> u64 {
    60
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub telegram: SanitizedTelegramConfig,
    pub server: ServerConfig,
    pub database: SanitizedDatabaseConfig,
    pub lifecycle: LifecycleConfig,
    pub relay: RelayConfig,
}

/// Sanitized Telegram config (token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedTelegramConfig {
    pub bot_token_configured: bool,
    pub admin_group_id: i64,
    pub api_base_url: String,
    pub poll_timeout_secs: u64,
    pub restart_delay_secs: u64,
}

/// Sanitized database config (URL hidden, it may carry credentials)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedDatabaseConfig {
    pub backend: DatabaseBackend,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub url_configured: bool,
    pub max_connections: u32,
    pub read_retry_attempts: u32,
    pub read_retry_backoff_ms: u64,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        let db = &config.database;
        Self {
            telegram: SanitizedTelegramConfig {
                bot_token_configured: !config.telegram.bot_token.is_empty(),
                admin_group_id: config.telegram.admin_group_id,
                api_base_url: config.telegram.api_base_url.clone(),
                poll_timeout_secs: config.telegram.poll_timeout_secs,
                restart_delay_secs: config.telegram.restart_delay_secs,
            },
            server: config.server.clone(),
            database: SanitizedDatabaseConfig {
                backend: db.backend,
                path: match db.backend {
                    DatabaseBackend::Sqlite => Some(db.path.clone()),
                    DatabaseBackend::Postgres => None,
                },
                url_configured: db.url.as_deref().is_some_and(|u| !u.is_empty()),
                max_connections: db.max_connections,
                read_retry_attempts: db.read_retry_attempts,
                read_retry_backoff_ms: db.read_retry_backoff_ms,
            },
            lifecycle: config.lifecycle.clone(),
            relay: config.relay.clone(),
        }
    }
}
