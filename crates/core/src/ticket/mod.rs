//! Ticket persistence: numbering, status and channel binding.

mod postgres_store;
mod retry;
mod sqlite_store;
mod store;
mod types;

use std::sync::Arc;

pub use postgres_store::PostgresTicketStore;
pub use retry::RetryPolicy;
pub use sqlite_store::SqliteTicketStore;
pub use store::{TicketError, TicketStore};
pub use types::{ChannelId, Ticket, TicketId, TicketStatus, UserId};

use crate::config::{DatabaseBackend, DatabaseConfig};

/// Open the configured store backend.
pub async fn connect_store(config: &DatabaseConfig) -> Result<Arc<dyn TicketStore>, TicketError> {
    match config.backend {
        DatabaseBackend::Sqlite => {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        TicketError::Database(format!(
                            "failed to create database directory {:?}: {}",
                            parent, e
                        ))
                    })?;
                }
            }
            tracing::info!("Opening SQLite ticket store at {:?}", config.path);
            Ok(Arc::new(SqliteTicketStore::new(&config.path)?))
        }
        DatabaseBackend::Postgres => {
            let url = config.url.as_deref().ok_or_else(|| {
                TicketError::Database("database.url is required for postgres".to_string())
            })?;
            tracing::info!(
                max_connections = config.max_connections,
                "Connecting to PostgreSQL ticket store"
            );
            Ok(Arc::new(
                PostgresTicketStore::connect(url, config.max_connections).await?,
            ))
        }
    }
}
