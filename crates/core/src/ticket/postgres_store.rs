//! PostgreSQL-backed ticket store implementation.
//!
//! Uses the same logical schema as the SQLite backend. The single `counter`
//! row doubles as the allocation lock: every operation that can create an
//! open ticket (allocation and reopening) takes it with `FOR UPDATE` first,
//! so the one-open-ticket check and the write happen under the same lock.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};

use super::{ChannelId, Ticket, TicketError, TicketId, TicketStatus, TicketStore, UserId};

const TICKET_COLUMNS: &str =
    "id, user_identity, user_label, channel_identity, status, created_at, updated_at, closed_at";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS counter (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        value BIGINT NOT NULL DEFAULT 0
    )
    "#,
    "INSERT INTO counter (id, value) VALUES (1, 0) ON CONFLICT (id) DO NOTHING",
    r#"
    CREATE TABLE IF NOT EXISTS tickets (
        id BIGINT PRIMARY KEY,
        user_identity BIGINT NOT NULL,
        user_label TEXT NOT NULL,
        channel_identity BIGINT UNIQUE,
        status TEXT NOT NULL CHECK (status IN ('open', 'closed', 'resolved')),
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL,
        closed_at TIMESTAMPTZ
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_tickets_user_identity ON tickets(user_identity)",
    "CREATE INDEX IF NOT EXISTS idx_tickets_status ON tickets(status)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_tickets_open_user ON tickets(user_identity) WHERE status = 'open'",
];

/// PostgreSQL-backed ticket store.
#[derive(Clone)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Connect to the database and create the tables if needed.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, TicketError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(db_err)?;

        let store = Self::from_pool(pool);
        store.initialize_schema().await?;
        Ok(store)
    }

    /// Wrap an existing pool. Call [`initialize_schema`](Self::initialize_schema) before use.
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `counter` and `tickets` tables if they do not exist.
    pub async fn initialize_schema(&self) -> Result<(), TicketError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        }
        Ok(())
    }

    fn row_to_ticket(row: &PgRow) -> Result<Ticket, sqlx::Error> {
        let status_str: String = row.try_get("status")?;
        let status = TicketStatus::parse(&status_str).ok_or_else(|| {
            sqlx::Error::Decode(format!("unknown ticket status '{}'", status_str).into())
        })?;

        Ok(Ticket {
            id: TicketId(row.try_get("id")?),
            user_id: UserId(row.try_get("user_identity")?),
            user_label: row.try_get("user_label")?,
            channel_id: row
                .try_get::<Option<i64>, _>("channel_identity")?
                .map(ChannelId),
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            closed_at: row.try_get("closed_at")?,
        })
    }

    async fn fetch_one_where(
        &self,
        where_clause: &str,
        value: i64,
    ) -> Result<Option<Ticket>, TicketError> {
        let sql = format!("SELECT {} FROM tickets {}", TICKET_COLUMNS, where_clause);
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref()
            .map(Self::row_to_ticket)
            .transpose()
            .map_err(db_err)
    }

    async fn lock_counter(tx: &mut Transaction<'_, Postgres>) -> Result<i64, TicketError> {
        sqlx::query_scalar("SELECT value FROM counter WHERE id = 1 FOR UPDATE")
            .fetch_one(&mut **tx)
            .await
            .map_err(db_err)
    }

    async fn lock_ticket(
        tx: &mut Transaction<'_, Postgres>,
        id: TicketId,
    ) -> Result<Ticket, TicketError> {
        let sql = format!(
            "SELECT {} FROM tickets WHERE id = $1 FOR UPDATE",
            TICKET_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id.0)
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_err)?
            .ok_or(TicketError::NotFound(id))?;

        Self::row_to_ticket(&row).map_err(db_err)
    }

    async fn find_other_open(
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        except: Option<TicketId>,
    ) -> Result<Option<TicketId>, TicketError> {
        let id: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM tickets WHERE user_identity = $1 AND status = 'open' AND id <> $2 LIMIT 1",
        )
        .bind(user_id.0)
        .bind(except.map(|t| t.0).unwrap_or(0))
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_err)?;

        Ok(id.map(TicketId))
    }
}

#[async_trait]
impl TicketStore for PostgresTicketStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn allocate_ticket(
        &self,
        user_id: UserId,
        user_label: &str,
    ) -> Result<Ticket, TicketError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current = Self::lock_counter(&mut tx).await?;

        if let Some(existing) = Self::find_other_open(&mut tx, user_id, None).await? {
            return Err(TicketError::DuplicateOpenTicket {
                user_id,
                ticket_id: existing,
            });
        }

        let number = current + 1;
        sqlx::query("UPDATE counter SET value = $1 WHERE id = 1")
            .bind(number)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO tickets
                (id, user_identity, user_label, channel_identity, status, created_at, updated_at, closed_at)
            VALUES ($1, $2, $3, NULL, 'open', $4, $4, NULL)
            "#,
        )
        .bind(number)
        .bind(user_id.0)
        .bind(user_label)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(Ticket {
            id: TicketId(number),
            user_id,
            user_label: user_label.to_string(),
            channel_id: None,
            status: TicketStatus::Open,
            created_at: now,
            updated_at: now,
            closed_at: None,
        })
    }

    async fn get_open_ticket(&self, user_id: UserId) -> Result<Option<Ticket>, TicketError> {
        self.fetch_one_where(
            "WHERE user_identity = $1 AND status = 'open' ORDER BY id DESC LIMIT 1",
            user_id.0,
        )
        .await
    }

    async fn get_latest_ticket(&self, user_id: UserId) -> Result<Option<Ticket>, TicketError> {
        self.fetch_one_where("WHERE user_identity = $1 ORDER BY id DESC LIMIT 1", user_id.0)
            .await
    }

    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, TicketError> {
        self.fetch_one_where("WHERE id = $1", id.0).await
    }

    async fn get_ticket_by_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<Ticket>, TicketError> {
        self.fetch_one_where("WHERE channel_identity = $1", channel_id.0)
            .await
    }

    async fn set_status(
        &self,
        id: TicketId,
        new_status: TicketStatus,
    ) -> Result<Ticket, TicketError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Lock order is always counter, then ticket.
        if new_status == TicketStatus::Open {
            Self::lock_counter(&mut tx).await?;
        }

        let current = Self::lock_ticket(&mut tx, id).await?;

        if !current.status.can_transition_to(new_status) {
            return Err(TicketError::InvalidTransition {
                ticket_id: id,
                from: current.status,
                to: new_status,
            });
        }

        if new_status == TicketStatus::Open {
            if let Some(other) = Self::find_other_open(&mut tx, current.user_id, Some(id)).await? {
                return Err(TicketError::DuplicateOpenTicket {
                    user_id: current.user_id,
                    ticket_id: other,
                });
            }
        }

        let now = Utc::now();
        let closed_at = match new_status {
            TicketStatus::Open => None,
            TicketStatus::Closed => Some(now),
            TicketStatus::Resolved => current.closed_at.or(Some(now)),
        };

        sqlx::query("UPDATE tickets SET status = $1, updated_at = $2, closed_at = $3 WHERE id = $4")
            .bind(new_status.as_str())
            .bind(now)
            .bind(closed_at)
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        Ok(Ticket {
            status: new_status,
            updated_at: now,
            closed_at,
            ..current
        })
    }

    async fn bind_channel(
        &self,
        id: TicketId,
        channel_id: ChannelId,
    ) -> Result<Ticket, TicketError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current = Self::lock_ticket(&mut tx, id).await?;

        if let Some(bound) = current.channel_id {
            return Err(TicketError::ChannelAlreadyBound {
                ticket_id: id,
                channel_id: bound,
            });
        }

        let now = Utc::now();
        sqlx::query("UPDATE tickets SET channel_identity = $1, updated_at = $2 WHERE id = $3")
            .bind(channel_id.0)
            .bind(now)
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if let sqlx::Error::Database(db) = &e {
                    if db.is_unique_violation() {
                        return TicketError::ChannelInUse(channel_id);
                    }
                }
                db_err(e)
            })?;

        tx.commit().await.map_err(db_err)?;

        Ok(Ticket {
            channel_id: Some(channel_id),
            updated_at: now,
            ..current
        })
    }

    async fn list_tickets(&self) -> Result<Vec<Ticket>, TicketError> {
        let sql = format!("SELECT {} FROM tickets ORDER BY id ASC", TICKET_COLUMNS);
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter()
            .map(Self::row_to_ticket)
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)
    }

    async fn count_by_status(&self) -> Result<HashMap<TicketStatus, i64>, TicketError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS total FROM tickets GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        let mut counts: HashMap<TicketStatus, i64> =
            TicketStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for row in rows {
            let status: String = row.try_get("status").map_err(db_err)?;
            let total: i64 = row.try_get("total").map_err(db_err)?;
            if let Some(status) = TicketStatus::parse(&status) {
                counts.insert(status, total);
            }
        }
        Ok(counts)
    }
}

fn db_err(e: sqlx::Error) -> TicketError {
    TicketError::Database(e.to_string())
}
