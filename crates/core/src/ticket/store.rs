//! Ticket storage trait and errors.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::ticket::{ChannelId, Ticket, TicketId, TicketStatus, UserId};

/// Error type for ticket operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TicketError {
    /// The user already holds an open ticket.
    #[error("User {user_id} already has open ticket #{ticket_id}")]
    DuplicateOpenTicket { user_id: UserId, ticket_id: TicketId },

    /// The requested status change is not legal from the current status.
    #[error("Cannot move ticket #{ticket_id} from {from} to {to}")]
    InvalidTransition {
        ticket_id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
    },

    /// Ticket not found.
    #[error("Ticket not found: #{0}")]
    NotFound(TicketId),

    /// A channel was already bound to this ticket.
    #[error("Ticket #{ticket_id} is already bound to channel {channel_id}")]
    ChannelAlreadyBound {
        ticket_id: TicketId,
        channel_id: ChannelId,
    },

    /// The channel already backs another ticket.
    #[error("Channel {0} is already bound to another ticket")]
    ChannelInUse(ChannelId),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),
}

impl TicketError {
    /// Whether a read that failed with this error may be attempted again.
    pub fn is_transient(&self) -> bool {
        matches!(self, TicketError::Database(_))
    }
}

/// Trait for ticket storage backends.
///
/// Both backends keep the same logical schema: a single-row `counter` table
/// and a `tickets` table. Callers never branch on which backend is in use.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Returns the name of this backend (for logging).
    fn backend_name(&self) -> &'static str;

    /// Atomically increments the counter and inserts an open ticket.
    ///
    /// The open-ticket check, the increment and the insert happen in one
    /// transaction, so two concurrent calls for the same user never both
    /// succeed.
    async fn allocate_ticket(&self, user_id: UserId, user_label: &str)
        -> Result<Ticket, TicketError>;

    /// Returns the user's open ticket, if any.
    async fn get_open_ticket(&self, user_id: UserId) -> Result<Option<Ticket>, TicketError>;

    /// Returns the user's most recently created ticket, whatever its status.
    async fn get_latest_ticket(&self, user_id: UserId) -> Result<Option<Ticket>, TicketError>;

    /// Get a ticket by number.
    async fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>, TicketError>;

    /// Get the ticket bound to a channel.
    async fn get_ticket_by_channel(
        &self,
        channel_id: ChannelId,
    ) -> Result<Option<Ticket>, TicketError>;

    /// Moves a ticket to a new status.
    ///
    /// Fails with `InvalidTransition` (leaving the row untouched) if the
    /// structural table does not allow it, and with `DuplicateOpenTicket` when
    /// reopening would give the user a second open ticket.
    async fn set_status(&self, id: TicketId, new_status: TicketStatus)
        -> Result<Ticket, TicketError>;

    /// Binds the backing channel. Allowed once per ticket.
    async fn bind_channel(&self, id: TicketId, channel_id: ChannelId)
        -> Result<Ticket, TicketError>;

    /// All tickets, ordered by number. Used to rebuild the registry.
    async fn list_tickets(&self) -> Result<Vec<Ticket>, TicketError>;

    /// Ticket counts per status.
    async fn count_by_status(&self) -> Result<HashMap<TicketStatus, i64>, TicketError>;
}
