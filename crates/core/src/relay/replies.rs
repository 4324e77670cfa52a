//! Texts the router sends in reply to events.

use crate::ticket::{Ticket, TicketId, TicketStatus};

pub const NOT_TICKET_CHANNEL: &str = "This is not a ticket channel.";
pub const TICKET_NOT_FOUND: &str = "This ticket could not be found.";
pub const TRY_AGAIN: &str = "Something went wrong while handling your request. Please try again.";
pub const NO_TICKETS: &str =
    "You don't have any tickets yet.\n\nSend a message or tap the button below to create one.";
pub const NO_TICKET_FOR_COMMAND: &str = "You don't have a ticket this applies to.";
pub const DESCRIBE_ISSUE: &str =
    "Please describe your issue or question, and I'll create a ticket for you.\n\nYou can type your message now.";
pub const WELCOME: &str = "Hi!\n\nHow can we help you today? Send a message to open a ticket.";
pub const NOT_YOUR_TICKET: &str = "That ticket does not belong to you.";
pub const USER_ONLY_COMMAND: &str =
    "This command is only available in the private chat with the bot.";
pub const CLOSE_CANCELLED: &str = "Operation cancelled. Your ticket stays open.";

pub fn welcome_back(id: TicketId) -> String {
    format!(
        "Hi!\n\nYou currently have an open ticket: Ticket #{}.\n\nType your message to continue the conversation, or use /status to check your ticket status.",
        id
    )
}

pub fn already_open(id: TicketId) -> String {
    format!(
        "You already have an open ticket: Ticket #{}.\n\nPlease close your current ticket first using /close, or continue the conversation.",
        id
    )
}

/// Same refusal as [`already_open`], worded for the admins of a ticket.
pub fn user_has_open_ticket(id: TicketId) -> String {
    format!(
        "The user already has an open ticket: Ticket #{}.\n\nThis ticket can be reopened once that one is closed.",
        id
    )
}

pub fn confirm_close(id: TicketId) -> String {
    format!(
        "Are you sure you want to close Ticket #{}?\n\nTap 'Close' to close it, or 'Cancel' to keep it open.",
        id
    )
}

/// Reply to a plain message sent while the user's latest ticket is not open.
pub fn ticket_not_open(ticket: &Ticket, can_reopen: bool) -> String {
    match (ticket.status, can_reopen) {
        (TicketStatus::Resolved, false) => format!(
            "Ticket #{} has been resolved. Use /newticket to open a new ticket.",
            ticket.id
        ),
        (TicketStatus::Resolved, true) => format!(
            "Ticket #{} has been resolved. Reopen it to continue, or use /newticket to open a new ticket.",
            ticket.id
        ),
        _ => format!(
            "Ticket #{} is closed. Reopen it to continue the conversation, or use /newticket to open a new ticket.",
            ticket.id
        ),
    }
}

/// Reply to an admin writing into a ticket that is not open.
pub fn channel_ticket_not_open(id: TicketId) -> String {
    format!(
        "Ticket #{} is closed, the message was not delivered. Use /reopen first.",
        id
    )
}

pub fn transition_refused(id: TicketId, from: TicketStatus, to: TicketStatus) -> String {
    let verb = match to {
        TicketStatus::Open => "reopened",
        TicketStatus::Closed => "closed",
        TicketStatus::Resolved => "resolved",
    };
    format!(
        "Ticket #{} is {} and cannot be {} right now.",
        id,
        status_label(from).to_lowercase(),
        verb
    )
}

pub fn delivery_failed(id: TicketId) -> String {
    format!(
        "Could not deliver the message for Ticket #{}. Please try again.",
        id
    )
}

pub fn status_report(ticket: &Ticket) -> String {
    let mut report = format!(
        "Ticket #{}\n\nStatus: {}\nCreated: {}",
        ticket.id,
        status_label(ticket.status),
        ticket.created_at.format("%Y-%m-%d %H:%M UTC")
    );
    if let Some(closed_at) = ticket.closed_at {
        report.push_str(&format!(
            "\nClosed: {}",
            closed_at.format("%Y-%m-%d %H:%M UTC")
        ));
    }
    report
}

fn status_label(status: TicketStatus) -> &'static str {
    match status {
        TicketStatus::Open => "Open",
        TicketStatus::Closed => "Closed",
        TicketStatus::Resolved => "Resolved",
    }
}
