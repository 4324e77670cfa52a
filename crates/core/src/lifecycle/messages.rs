//! Notification texts produced by lifecycle transitions.

use crate::relay::{Button, ButtonAction, UserProfile};
use crate::ticket::{Ticket, TicketId};

use super::Actor;

pub fn ticket_created(id: TicketId) -> String {
    format!("Ticket #{} created. Someone will assist you shortly.", id)
}

/// First message in a new channel, before the relayed content.
pub fn channel_header(ticket: &Ticket, user: Option<&UserProfile>) -> String {
    let mut header = format!(
        "New ticket #{} from {} (user id {})",
        ticket.id, ticket.user_label, ticket.user_id
    );
    if let Some(name) = user
        .and_then(|u| u.first_name.as_deref())
        .filter(|n| !n.is_empty())
    {
        header.push_str(&format!("\nName: {}", name));
    }
    header
}

pub fn closed_for_user(id: TicketId) -> String {
    format!(
        "Ticket #{} has been closed.\n\nIf your issue isn't resolved, you can reopen it or mark it as resolved.",
        id
    )
}

pub fn closed_for_channel(id: TicketId, actor: Actor) -> String {
    match actor {
        Actor::User => format!("Ticket #{} was closed by the user.", id),
        Actor::Admin => format!("Ticket #{} has been closed.", id),
    }
}

pub fn reopened_for_user(id: TicketId) -> String {
    format!(
        "Ticket #{} has been reopened. You can continue the conversation now.",
        id
    )
}

pub fn reopened_for_channel(id: TicketId, actor: Actor) -> String {
    match actor {
        Actor::User => format!("Ticket #{} was reopened by the user.", id),
        Actor::Admin => format!("Ticket #{} has been reopened.", id),
    }
}

pub fn resolved_for_user(id: TicketId) -> String {
    format!(
        "Ticket #{} has been resolved. Thank you for using our support service!",
        id
    )
}

pub fn resolved_for_channel(id: TicketId, actor: Actor) -> String {
    match actor {
        Actor::User => format!("Ticket #{} was marked as resolved by the user.", id),
        Actor::Admin => format!("Ticket #{} has been marked as resolved.", id),
    }
}

/// Buttons offered on a closed ticket.
pub fn closed_buttons(id: TicketId) -> Vec<Button> {
    vec![
        Button::new("Reopen", ButtonAction::Reopen(id)),
        Button::new("Resolve", ButtonAction::Resolve(id)),
    ]
}

/// Buttons under the close confirmation prompt.
pub fn close_confirmation_buttons(id: TicketId) -> Vec<Button> {
    vec![
        Button::new("Close", ButtonAction::Close(id)),
        Button::new("Cancel", ButtonAction::Cancel),
    ]
}

pub fn new_ticket_button() -> Button {
    Button::new("Create New Ticket", ButtonAction::NewTicket)
}
