//! Channel title conventions.
//!
//! Titles are a display artifact derived from the stored status; nothing
//! reads them back.

use crate::ticket::{Ticket, TicketId, TicketStatus};

/// Longest title the platform accepts for a channel.
pub const MAX_TITLE_CHARS: usize = 128;

const STRIPPED_CHARS: [char; 5] = ['<', '>', '&', '"', '\''];

/// Title of a channel whose ticket is open.
pub fn open_title(id: TicketId, label: &str) -> String {
    sanitize_title(&format!("Ticket #{} - {}", id, label))
}

/// Title of a channel whose ticket is closed or resolved.
pub fn closed_title(id: TicketId, label: &str) -> String {
    sanitize_title(&format!("CLOSED #{} - {}", id, label))
}

/// Title matching the ticket's current status.
pub fn title_for(ticket: &Ticket) -> String {
    match ticket.status {
        TicketStatus::Open => open_title(ticket.id, &ticket.user_label),
        TicketStatus::Closed | TicketStatus::Resolved => {
            closed_title(ticket.id, &ticket.user_label)
        }
    }
}

/// Drops characters the platform rejects and caps the length.
pub fn sanitize_title(raw: &str) -> String {
    let cleaned: String = raw.chars().filter(|c| !STRIPPED_CHARS.contains(c)).collect();

    if cleaned.chars().count() <= MAX_TITLE_CHARS {
        return cleaned;
    }

    let mut truncated: String = cleaned.chars().take(MAX_TITLE_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}
