//! Outbound boundary to the chat platform.

use async_trait::async_trait;
use thiserror::Error;

use crate::ticket::{ChannelId, UserId};

use super::types::{Button, RelayedMessage, UserProfile};

/// Errors reported by a messenger implementation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessengerError {
    /// The request never got a response (network, timeout).
    #[error("Messenger request failed: {0}")]
    Request(String),

    /// The platform answered with an error.
    #[error("Messenger API error: {0}")]
    Api(String),

    /// The recipient cannot be reached (blocked the bot, chat deleted).
    #[error("Recipient unavailable: {0}")]
    Unavailable(String),
}

impl MessengerError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Api(_) => "api",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

/// Sends messages and manages ticket channels on the chat platform.
///
/// The router never inspects platform details; everything it needs to say
/// or do goes through this trait.
#[async_trait]
pub trait Messenger: Send + Sync {
    /// Sends a bot-authored text to a user, with optional inline buttons.
    async fn send_to_user(
        &self,
        user: UserId,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), MessengerError>;

    /// Sends a bot-authored text into a channel of the admin group.
    async fn send_to_channel(&self, channel: ChannelId, text: &str) -> Result<(), MessengerError>;

    /// Delivers an admin's message to the user verbatim, without a header.
    async fn relay_to_user(
        &self,
        user: UserId,
        message: &RelayedMessage,
    ) -> Result<(), MessengerError>;

    /// Delivers a user's message into the ticket channel, keeping the sender visible.
    async fn relay_to_channel(
        &self,
        channel: ChannelId,
        sender: &UserProfile,
        message: &RelayedMessage,
    ) -> Result<(), MessengerError>;

    /// Creates a channel in the admin group and returns its identity.
    async fn create_channel(&self, title: &str) -> Result<ChannelId, MessengerError>;

    /// Renames a channel. Titles are display-only.
    async fn rename_channel(&self, channel: ChannelId, title: &str) -> Result<(), MessengerError>;
}
