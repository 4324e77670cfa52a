//! Core ticket data types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Identifiers
// ============================================================================

/// Ticket number, allocated from the global counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub i64);

/// Identity of an end user on the chat platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Identity of a ticket channel (forum topic) inside the admin group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub i64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Conversation is active and messages are relayed.
    Open,
    /// Closed by the user or an admin; can be reopened.
    Closed,
    /// Closed and confirmed as solved by the user.
    Resolved,
}

impl TicketStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [TicketStatus; 3] = [
        TicketStatus::Open,
        TicketStatus::Closed,
        TicketStatus::Resolved,
    ];

    /// Returns the status as stored in the `status` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::Closed => "closed",
            TicketStatus::Resolved => "resolved",
        }
    }

    /// Parses a stored status value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(TicketStatus::Open),
            "closed" => Some(TicketStatus::Closed),
            "resolved" => Some(TicketStatus::Resolved),
            _ => None,
        }
    }

    /// Returns true if messages are relayed for tickets in this status.
    pub fn is_open(&self) -> bool {
        matches!(self, TicketStatus::Open)
    }

    /// Returns true if the store may move a ticket from this status to `next`.
    ///
    /// This is the structural table only. Who may trigger a transition is
    /// decided by the lifecycle module; `Resolved -> Open` exists for the
    /// admin override and is gated there by configuration.
    pub fn can_transition_to(&self, next: TicketStatus) -> bool {
        matches!(
            (self, next),
            (TicketStatus::Open, TicketStatus::Closed)
                | (TicketStatus::Closed, TicketStatus::Open)
                | (TicketStatus::Closed, TicketStatus::Resolved)
                | (TicketStatus::Resolved, TicketStatus::Open)
        )
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Ticket
// ============================================================================

/// One support conversation between a user and the admin group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Ticket number, unique and never reused.
    pub id: TicketId,
    /// The user who opened the ticket.
    pub user_id: UserId,
    /// Display label for channel titles (username, or the numeric id).
    pub user_label: String,
    /// Backing channel. `None` only between allocation and channel binding.
    pub channel_id: Option<ChannelId>,
    /// Current lifecycle status.
    pub status: TicketStatus,
    /// When the ticket was allocated.
    pub created_at: DateTime<Utc>,
    /// Refreshed by every mutation.
    pub updated_at: DateTime<Utc>,
    /// When the ticket last left `Open`; cleared on reopen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Returns true if the ticket number was allocated but no channel was bound.
    pub fn is_unbound(&self) -> bool {
        self.channel_id.is_none()
    }
}
