//! Inbound events, outbound payloads and routing outcomes.

use serde::{Deserialize, Serialize};

use crate::ticket::{ChannelId, TicketId, TicketStatus, UserId};

// ============================================================================
// Users
// ============================================================================

/// The end user behind a private conversation with the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    /// Platform handle, without the leading `@`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
}

impl UserProfile {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            username: None,
            first_name: None,
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Display label used in channel titles: the username, else the numeric id.
    pub fn label(&self) -> String {
        match self.username.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => self.id.to_string(),
        }
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Where a message lives on the platform, so the transport can copy or
/// forward it without re-uploading content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub chat_id: i64,
    pub message_id: i64,
}

/// Opaque attachment handle (photo, document, voice, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Platform media kind, e.g. `photo` or `document`.
    pub kind: String,
    /// Platform file handle.
    pub file_id: String,
}

/// A message to relay verbatim to the counterpart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayedMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Original platform message, if the transport can copy it directly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<MessageRef>,
}

impl RelayedMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn with_origin(mut self, chat_id: i64, message_id: i64) -> Self {
        self.origin = Some(MessageRef {
            chat_id,
            message_id,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.text.as_deref().map_or(true, str::is_empty)
            && self.attachments.is_empty()
            && self.origin.is_none()
    }
}

// ============================================================================
// Commands and buttons
// ============================================================================

/// Commands understood by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    Start,
    NewTicket,
    Status,
    Close,
    Reopen,
    Resolve,
    /// Dismisses a pending close confirmation.
    Cancel,
}

impl CommandName {
    /// Parses a command word without the leading slash.
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_ascii_lowercase().as_str() {
            "start" => Some(Self::Start),
            "newticket" | "new_ticket" => Some(Self::NewTicket),
            "status" => Some(Self::Status),
            "close" => Some(Self::Close),
            "reopen" => Some(Self::Reopen),
            "resolve" => Some(Self::Resolve),
            "cancel" => Some(Self::Cancel),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::NewTicket => "new_ticket",
            Self::Status => "status",
            Self::Close => "close",
            Self::Reopen => "reopen",
            Self::Resolve => "resolve",
            Self::Cancel => "cancel",
        }
    }
}

/// Who issued a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandSource {
    /// An end user, from the private chat.
    User(UserProfile),
    /// An admin, from a chat inside the admin group.
    Channel(ChannelId),
}

/// A command, optionally naming the ticket it targets (inline buttons do).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub source: CommandSource,
    pub name: CommandName,
    pub ticket_id: Option<TicketId>,
}

/// Action attached to an inline button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonAction {
    NewTicket,
    Close(TicketId),
    Reopen(TicketId),
    Resolve(TicketId),
    Cancel,
}

impl ButtonAction {
    /// Encodes the action as callback data.
    pub fn callback_data(&self) -> String {
        match self {
            Self::NewTicket => "new_ticket".to_string(),
            Self::Close(id) => format!("close_{}", id),
            Self::Reopen(id) => format!("reopen_{}", id),
            Self::Resolve(id) => format!("resolve_{}", id),
            Self::Cancel => "cancel".to_string(),
        }
    }

    /// Decodes callback data produced by [`callback_data`](Self::callback_data).
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "new_ticket" => return Some(Self::NewTicket),
            "cancel" => return Some(Self::Cancel),
            _ => {}
        }
        let (action, number) = data.rsplit_once('_')?;
        let id = TicketId(number.parse().ok()?);
        match action {
            "close" => Some(Self::Close(id)),
            "reopen" => Some(Self::Reopen(id)),
            "resolve" => Some(Self::Resolve(id)),
            _ => None,
        }
    }

    /// The command a press of this button stands for.
    pub fn into_command(self, source: CommandSource) -> Command {
        let (name, ticket_id) = match self {
            Self::NewTicket => (CommandName::NewTicket, None),
            Self::Close(id) => (CommandName::Close, Some(id)),
            Self::Reopen(id) => (CommandName::Reopen, Some(id)),
            Self::Resolve(id) => (CommandName::Resolve, Some(id)),
            Self::Cancel => (CommandName::Cancel, None),
        };
        Command {
            source,
            name,
            ticket_id,
        }
    }
}

/// An inline button offered with a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub action: ButtonAction,
}

impl Button {
    pub fn new(label: impl Into<String>, action: ButtonAction) -> Self {
        Self {
            label: label.into(),
            action,
        }
    }
}

// ============================================================================
// Events and outcomes
// ============================================================================

/// Everything the transport hands to the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Plain message from a user in their private chat.
    UserMessage {
        user: UserProfile,
        message: RelayedMessage,
    },
    /// Plain message posted by an admin in a chat of the admin group.
    ChannelMessage {
        channel: ChannelId,
        message: RelayedMessage,
    },
    Command(Command),
}

impl InboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserMessage { .. } => "user_message",
            Self::ChannelMessage { .. } => "channel_message",
            Self::Command(_) => "command",
        }
    }
}

/// Relay direction, used for metrics and outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    UserToChannel,
    ChannelToUser,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserToChannel => "user_to_channel",
            Self::ChannelToUser => "channel_to_user",
        }
    }
}

/// Why an event was refused without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Plain message for a ticket that is not open.
    TicketClosed,
    /// The user has no ticket the command could apply to.
    NoTicket,
    /// `new_ticket` while an open ticket exists.
    AlreadyOpen,
    /// Command from an admin-group chat that backs no ticket.
    NotTicketChannel,
    /// The ticket named by a button belongs to someone else.
    NotOwner,
    /// Lifecycle refused the transition.
    InvalidTransition,
    /// Plain message in an admin-group chat that backs no ticket.
    UnknownChannel,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TicketClosed => "ticket_closed",
            Self::NoTicket => "no_ticket",
            Self::AlreadyOpen => "already_open",
            Self::NotTicketChannel => "not_ticket_channel",
            Self::NotOwner => "not_owner",
            Self::InvalidTransition => "invalid_transition",
            Self::UnknownChannel => "unknown_channel",
        }
    }
}

/// What the router did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// A new ticket was created and the first message relayed.
    Created { ticket_id: TicketId },
    /// A message was relayed within an open ticket.
    Forwarded {
        ticket_id: TicketId,
        direction: Direction,
    },
    /// A lifecycle transition was applied.
    Transitioned {
        ticket_id: TicketId,
        from: TicketStatus,
        to: TicketStatus,
    },
    /// The event was refused and the sender told why.
    Rejected {
        ticket_id: Option<TicketId>,
        reason: RejectReason,
    },
    /// An informational command was answered.
    Answered,
    /// The event was dropped without a reply.
    Ignored,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_prefers_username() {
        let user = UserProfile::new(UserId(42)).with_username("alice");
        assert_eq!(user.label(), "alice");

        let anonymous = UserProfile::new(UserId(42));
        assert_eq!(anonymous.label(), "42");

        let blank = UserProfile::new(UserId(7)).with_username("");
        assert_eq!(blank.label(), "7");
    }

    #[test]
    fn test_command_names() {
        assert_eq!(CommandName::parse("close"), Some(CommandName::Close));
        assert_eq!(CommandName::parse("NewTicket"), Some(CommandName::NewTicket));
        assert_eq!(CommandName::parse("new_ticket"), Some(CommandName::NewTicket));
        assert_eq!(CommandName::parse("cancel"), Some(CommandName::Cancel));
        assert_eq!(CommandName::parse("help"), None);
    }

    #[test]
    fn test_button_callback_data() {
        let cases = [
            (ButtonAction::NewTicket, "new_ticket"),
            (ButtonAction::Close(TicketId(3)), "close_3"),
            (ButtonAction::Reopen(TicketId(12)), "reopen_12"),
            (ButtonAction::Resolve(TicketId(7)), "resolve_7"),
            (ButtonAction::Cancel, "cancel"),
        ];
        for (action, data) in cases {
            assert_eq!(action.callback_data(), data);
            assert_eq!(ButtonAction::parse(data), Some(action));
        }
    }

    #[test]
    fn test_button_parse_rejects_garbage() {
        assert_eq!(ButtonAction::parse("reopen_"), None);
        assert_eq!(ButtonAction::parse("reopen_x"), None);
        assert_eq!(ButtonAction::parse("user_close_3"), None);
        assert_eq!(ButtonAction::parse(""), None);
    }

    #[test]
    fn test_button_into_command() {
        let source = CommandSource::User(UserProfile::new(UserId(1)));
        let command = ButtonAction::Resolve(TicketId(9)).into_command(source.clone());
        assert_eq!(command.name, CommandName::Resolve);
        assert_eq!(command.ticket_id, Some(TicketId(9)));
        assert_eq!(command.source, source);

        let cancel = ButtonAction::Cancel.into_command(source);
        assert_eq!(cancel.name, CommandName::Cancel);
        assert_eq!(cancel.ticket_id, None);
    }

    #[test]
    fn test_relayed_message_is_empty() {
        assert!(RelayedMessage::default().is_empty());
        assert!(!RelayedMessage::text("hi").is_empty());
        assert!(!RelayedMessage::default().with_origin(1, 2).is_empty());
    }
}
