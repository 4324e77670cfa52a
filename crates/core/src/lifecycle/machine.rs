//! Transition rules and the side effects each transition requires.
//!
//! Planning is pure: it never touches the store or the messenger. The router
//! persists `plan.to` and then performs `plan.effects` in order.

use serde::Serialize;

use crate::config::{LifecycleConfig, ResolvedReopenPolicy};
use crate::relay::{Button, CommandName};
use crate::ticket::{ChannelId, Ticket, TicketError, TicketId, TicketStatus, UserId};

use super::{messages, titles};

/// A requested lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Close,
    Reopen,
    Resolve,
}

impl LifecycleEvent {
    /// Status the ticket ends up in.
    pub fn target(&self) -> TicketStatus {
        match self {
            Self::Close => TicketStatus::Closed,
            Self::Reopen => TicketStatus::Open,
            Self::Resolve => TicketStatus::Resolved,
        }
    }

    pub fn from_command(name: CommandName) -> Option<Self> {
        match name {
            CommandName::Close => Some(Self::Close),
            CommandName::Reopen => Some(Self::Reopen),
            CommandName::Resolve => Some(Self::Resolve),
            CommandName::Start
            | CommandName::NewTicket
            | CommandName::Status
            | CommandName::Cancel => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Close => "close",
            Self::Reopen => "reopen",
            Self::Resolve => "resolve",
        }
    }
}

/// Who requested a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Actor {
    /// The ticket's owner, from the private chat.
    User,
    /// An admin, from the ticket channel.
    Admin,
}

/// A side effect to perform after the new status is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RenameChannel {
        channel: ChannelId,
        title: String,
    },
    NotifyUser {
        user: UserId,
        text: String,
        buttons: Vec<Button>,
    },
    NotifyChannel {
        channel: ChannelId,
        text: String,
    },
}

/// The outcome of planning a legal transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionPlan {
    pub ticket_id: TicketId,
    pub event: LifecycleEvent,
    pub actor: Actor,
    pub from: TicketStatus,
    pub to: TicketStatus,
    /// Ordered effects. Channel effects are omitted for unbound tickets.
    pub effects: Vec<Effect>,
}

/// Returns true if `actor` may apply `event` to a ticket in `status`.
pub fn is_allowed(
    status: TicketStatus,
    event: LifecycleEvent,
    actor: Actor,
    config: &LifecycleConfig,
) -> bool {
    match (status, event) {
        (TicketStatus::Open, LifecycleEvent::Close) => true,
        (TicketStatus::Closed, LifecycleEvent::Reopen) => true,
        (TicketStatus::Closed, LifecycleEvent::Resolve) => true,
        (TicketStatus::Resolved, LifecycleEvent::Reopen) => match config.resolved_reopen {
            ResolvedReopenPolicy::Disabled => false,
            ResolvedReopenPolicy::AdminOnly => actor == Actor::Admin,
            ResolvedReopenPolicy::Anyone => true,
        },
        _ => false,
    }
}

/// Plans `event` on `ticket`, failing with `InvalidTransition` if it is not legal.
pub fn plan(
    ticket: &Ticket,
    event: LifecycleEvent,
    actor: Actor,
    config: &LifecycleConfig,
) -> Result<TransitionPlan, TicketError> {
    let to = event.target();
    if !is_allowed(ticket.status, event, actor, config) {
        return Err(TicketError::InvalidTransition {
            ticket_id: ticket.id,
            from: ticket.status,
            to,
        });
    }

    let id = ticket.id;
    let mut effects = Vec::with_capacity(3);

    match event {
        LifecycleEvent::Close => {
            if let Some(channel) = ticket.channel_id {
                effects.push(Effect::RenameChannel {
                    channel,
                    title: titles::closed_title(id, &ticket.user_label),
                });
            }
            effects.push(Effect::NotifyUser {
                user: ticket.user_id,
                text: messages::closed_for_user(id),
                buttons: messages::closed_buttons(id),
            });
            if let Some(channel) = ticket.channel_id {
                effects.push(Effect::NotifyChannel {
                    channel,
                    text: messages::closed_for_channel(id, actor),
                });
            }
        }
        LifecycleEvent::Reopen => {
            if let Some(channel) = ticket.channel_id {
                effects.push(Effect::RenameChannel {
                    channel,
                    title: titles::open_title(id, &ticket.user_label),
                });
                effects.push(Effect::NotifyChannel {
                    channel,
                    text: messages::reopened_for_channel(id, actor),
                });
            }
            effects.push(Effect::NotifyUser {
                user: ticket.user_id,
                text: messages::reopened_for_user(id),
                buttons: Vec::new(),
            });
        }
        LifecycleEvent::Resolve => {
            // Title stays in the closed form.
            effects.push(Effect::NotifyUser {
                user: ticket.user_id,
                text: messages::resolved_for_user(id),
                buttons: Vec::new(),
            });
            if let Some(channel) = ticket.channel_id {
                effects.push(Effect::NotifyChannel {
                    channel,
                    text: messages::resolved_for_channel(id, actor),
                });
            }
        }
    }

    Ok(TransitionPlan {
        ticket_id: id,
        event,
        actor,
        from: ticket.status,
        to,
        effects,
    })
}
