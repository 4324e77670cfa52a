//! SQLite-backed ticket store implementation.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};

use super::{ChannelId, Ticket, TicketError, TicketId, TicketStatus, TicketStore, UserId};

const TICKET_COLUMNS: &str =
    "id, user_identity, user_label, channel_identity, status, created_at, updated_at, closed_at";

/// SQLite-backed ticket store.
///
/// rusqlite is synchronous, so every call runs on the blocking thread pool.
/// Mutations use `IMMEDIATE` transactions, which take the database write lock
/// up front and serialize allocation even across processes sharing the file.
pub struct SqliteTicketStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTicketStore {
    /// Create a new SQLite ticket store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, TicketError> {
        let conn = Connection::open(path).map_err(db_err)?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(db_err)?;
        if !journal_mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(
                "SQLite kept journal_mode={} for {:?}; continuing without WAL",
                journal_mode,
                path
            );
        }
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;

        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory SQLite ticket store (useful for testing).
    pub fn in_memory() -> Result<Self, TicketError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), TicketError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS counter (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                value INTEGER NOT NULL DEFAULT 0
            );

            INSERT OR IGNORE INTO counter (id, value) VALUES (1, 0);

            CREATE TABLE IF NOT EXISTS tickets (
                id INTEGER PRIMARY KEY,
                user_identity INTEGER NOT NULL,
                user_label TEXT NOT NULL,
                channel_identity INTEGER UNIQUE,
                status TEXT NOT NULL CHECK (status IN ('open', 'closed', 'resolved')),
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                closed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_tickets_user_identity ON tickets(user_identity);
            CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_tickets_open_user
                ON tickets(user_identity) WHERE status = 'open';
            "#,
        )
        .map_err(db_err)
    }

    /// Runs `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, TicketError>
    where
        F: FnOnce(&mut Connection) -> Result<T, TicketError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| TicketError::Database("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| TicketError::Database(format!("blocking task failed: {}", e)))?
    }

    fn row_to_ticket(row: &rusqlite::Row) -> rusqlite::Result<Ticket> {
        let status_str: String = row.get(4)?;
        let status = TicketStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                4,
                Type::Text,
                format!("unknown ticket status '{}'", status_str).into(),
            )
        })?;

        let closed_at = match row.get::<_, Option<String>>(7)? {
            Some(value) => Some(parse_timestamp(7, &value)?),
            None => None,
        };

        Ok(Ticket {
            id: TicketId(row.get(0)?),
            user_id: UserId(row.get(1)?),
            user_label: row.get(2)?,
            channel_id: row.get::<_, Option<i64>>(3)?.map(ChannelId),
            status,
            created_at: parse_timestamp(5, &row.get::<_, String>(5)?)?,
            updated_at: parse_timestamp(6, &row.get::<_, String>(6)?)?,
            closed_at,
        })
    }

    fn query_ticket(
        conn: &Connection,
        where_clause: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<Ticket>, TicketError> {
        let sql = format!("SELECT {} FROM tickets {}", TICKET_COLUMNS, where_clause);
        conn.query_row(&sql, params, Self::row_to_ticket)
            .optional()
            .map_err(db_err)
    }
}

#[async_trait]
impl TicketStore for SqliteTicketStore {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn allocate_ticket(
        &self,
        user_id: UserId,
        user_label: &str,
    ) -> Result<Ticket, TicketError> {
        let user_label = user_label.to_string();
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err)?;

            if let Some(existing) = Self::query_ticket(
                &tx,
                "WHERE user_identity = ?1 AND status = 'open' LIMIT 1",
                params![user_id.0],
            )? {
                return Err(TicketError::DuplicateOpenTicket {
                    user_id,
                    ticket_id: existing.id,
                });
            }

            tx.execute("UPDATE counter SET value = value + 1 WHERE id = 1", [])
                .map_err(db_err)?;
            let number: i64 = tx
                .query_row("SELECT value FROM counter WHERE id = 1", [], |row| row.get(0))
                .map_err(db_err)?;

            let now = Utc::now();
            tx.execute(
                "INSERT INTO tickets (id, user_identity, user_label, channel_identity, status, created_at, updated_at, closed_at) VALUES (?1, ?2, ?3, NULL, 'open', ?4, ?4, NULL)",
                params![number, user_id.0, user_label, now.to_rfc3339()],
            )
            .map_err(db_err)?;

            tx.commit().map_err(db_err)?;

            Ok(Ticket {
                id: TicketId(number),
                user_id,
                user_label,
                channel_id: None,
                status: TicketStatus::Open,
                created_at: now,
                updated_at: now,
                closed_at: None,
            })
        })
        .await
    }

    async fn get_open_ticket(&self, user_id: UserId) -> Result<Option<Ticket>, TicketError> {
        self.with_conn(move |conn| {
            Self::query_ticket(
                conn,
                "WHERE user_identity = ?1 AND status = 'open' ORDER BY id DESC LIMIT 1",
                params![user_id.0],
            )
        })
        .await
    }

    async fn get_latest_ticket(&self, user_id: UserId) -> Result<Option<Ticket>, TicketError> {
        self.with_conn(move |conn| {
            Self::query_ticket(
                conn,
                "WHERE user_identity = ?1 ORDER BY id DESC LIMIT 1",
                params![user_id.0],
            )
        })
        .await
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, TicketError> {
        self.with_conn(move |conn| Self::query_ticket(conn, "WHERE id = ?1", params![id.0]))
            .await
    }

    async fn get_ticket_by_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<Ticket>, TicketError> {
        self.with_conn(move |conn| {
            Self::query_ticket(conn, "WHERE channel_identity = ?1", params![channel_id.0])
        })
        .await
    }

    async fn set_status(
        &self,
        id: TicketId,
        new_status: TicketStatus,
    ) -> Result<Ticket, TicketError> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err)?;

            let current = Self::query_ticket(&tx, "WHERE id = ?1", params![id.0])?
                .ok_or(TicketError::NotFound(id))?;

            if !current.status.can_transition_to(new_status) {
                return Err(TicketError::InvalidTransition {
                    ticket_id: id,
                    from: current.status,
                    to: new_status,
                });
            }

            if new_status == TicketStatus::Open {
                if let Some(other) = Self::query_ticket(
                    &tx,
                    "WHERE user_identity = ?1 AND status = 'open' AND id != ?2 LIMIT 1",
                    params![current.user_id.0, id.0],
                )? {
                    return Err(TicketError::DuplicateOpenTicket {
                        user_id: current.user_id,
                        ticket_id: other.id,
                    });
                }
            }

            let now = Utc::now();
            let closed_at = match new_status {
                TicketStatus::Open => None,
                TicketStatus::Closed => Some(now),
                TicketStatus::Resolved => current.closed_at.or(Some(now)),
            };

            tx.execute(
                "UPDATE tickets SET status = ?1, updated_at = ?2, closed_at = ?3 WHERE id = ?4",
                params![
                    new_status.as_str(),
                    now.to_rfc3339(),
                    closed_at.map(|t| t.to_rfc3339()),
                    id.0
                ],
            )
            .map_err(db_err)?;

            tx.commit().map_err(db_err)?;

            Ok(Ticket {
                status: new_status,
                updated_at: now,
                closed_at,
                ..current
            })
        })
        .await
    }

    async fn bind_channel(
        &self,
        id: TicketId,
        channel_id: ChannelId,
    ) -> Result<Ticket, TicketError> {
        self.with_conn(move |conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err)?;

            let current = Self::query_ticket(&tx, "WHERE id = ?1", params![id.0])?
                .ok_or(TicketError::NotFound(id))?;

            if let Some(bound) = current.channel_id {
                return Err(TicketError::ChannelAlreadyBound {
                    ticket_id: id,
                    channel_id: bound,
                });
            }

            let now = Utc::now();
            tx.execute(
                "UPDATE tickets SET channel_identity = ?1, updated_at = ?2 WHERE id = ?3",
                params![channel_id.0, now.to_rfc3339(), id.0],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    TicketError::ChannelInUse(channel_id)
                } else {
                    db_err(e)
                }
            })?;

            tx.commit().map_err(db_err)?;

            Ok(Ticket {
                channel_id: Some(channel_id),
                updated_at: now,
                ..current
            })
        })
        .await
    }

    async fn list_tickets(&self) -> Result<Vec<Ticket>, TicketError> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM tickets ORDER BY id ASC", TICKET_COLUMNS);
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt.query_map([], Self::row_to_ticket).map_err(db_err)?;

            let mut tickets = Vec::new();
            for row_result in rows {
                tickets.push(row_result.map_err(db_err)?);
            }
            Ok(tickets)
        })
        .await
    }

    async fn count_by_status(&self) -> Result<HashMap<TicketStatus, i64>, TicketError> {
        self.with_conn(|conn| {
            let mut counts: HashMap<TicketStatus, i64> =
                TicketStatus::ALL.iter().map(|s| (*s, 0)).collect();

            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM tickets GROUP BY status")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(db_err)?;

            for row_result in rows {
                let (status, count) = row_result.map_err(db_err)?;
                if let Some(status) = TicketStatus::parse(&status) {
                    counts.insert(status, count);
                }
            }
            Ok(counts)
        })
        .await
    }
}

fn db_err(e: rusqlite::Error) -> TicketError {
    TicketError::Database(e.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}
