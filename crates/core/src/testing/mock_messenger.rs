//! Mock messenger for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::relay::{Button, Messenger, MessengerError, RelayedMessage, UserProfile};
use crate::ticket::{ChannelId, UserId};

/// Messenger operations, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessengerOp {
    SendToUser,
    SendToChannel,
    RelayToUser,
    RelayToChannel,
    CreateChannel,
    RenameChannel,
}

/// A recorded messenger call for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    SentToUser {
        user: UserId,
        text: String,
        buttons: Vec<Button>,
    },
    SentToChannel {
        channel: ChannelId,
        text: String,
    },
    RelayedToUser {
        user: UserId,
        message: RelayedMessage,
    },
    RelayedToChannel {
        channel: ChannelId,
        sender: UserId,
        message: RelayedMessage,
    },
    ChannelCreated {
        channel: ChannelId,
        title: String,
    },
    ChannelRenamed {
        channel: ChannelId,
        title: String,
    },
}

/// Mock implementation of the Messenger trait.
///
/// Provides controllable behavior for testing:
/// - Records every successful call, in order
/// - Hands out sequential channel ids starting at 100
/// - Fails a chosen operation once, or every channel creation
/// - Simulates relay latency
///
/// # Example
///
/// ```rust,ignore
/// use concierge_core::testing::MockMessenger;
///
/// let messenger = Arc::new(MockMessenger::new());
/// let router = RelayRouter::new(store, registry, messenger.clone(), LifecycleConfig::default());
///
/// router.process(event).await;
///
/// assert_eq!(messenger.created_channels().await.len(), 1);
/// ```
#[derive(Debug)]
pub struct MockMessenger {
    calls: Arc<RwLock<Vec<RecordedCall>>>,
    next_channel: Arc<RwLock<i64>>,
    /// Errors returned once by the next call of the given operation.
    next_errors: Arc<RwLock<HashMap<MessengerOp, MessengerError>>>,
    /// When set, every channel creation fails.
    create_channel_down: Arc<RwLock<bool>>,
    /// Simulated latency for relay calls, in milliseconds.
    relay_latency_ms: Arc<RwLock<u64>>,
}

impl Default for MockMessenger {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessenger {
    /// Create a new mock messenger.
    pub fn new() -> Self {
        Self {
            calls: Arc::new(RwLock::new(Vec::new())),
            next_channel: Arc::new(RwLock::new(100)),
            next_errors: Arc::new(RwLock::new(HashMap::new())),
            create_channel_down: Arc::new(RwLock::new(false)),
            relay_latency_ms: Arc::new(RwLock::new(0)),
        }
    }

    /// Get all recorded calls.
    pub async fn calls(&self) -> Vec<RecordedCall> {
        self.calls.read().await.clone()
    }

    /// Clear recorded calls.
    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    /// Texts the bot sent to a user, oldest first.
    pub async fn notices_to_user(&self, user: UserId) -> Vec<String> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|call| match call {
                RecordedCall::SentToUser { user: u, text, .. } if *u == user => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    /// Buttons attached to the most recent notice sent to a user.
    pub async fn last_buttons_for_user(&self, user: UserId) -> Vec<Button> {
        self.calls
            .read()
            .await
            .iter()
            .rev()
            .find_map(|call| match call {
                RecordedCall::SentToUser {
                    user: u, buttons, ..
                } if *u == user => Some(buttons.clone()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Texts the bot posted into a channel, oldest first.
    pub async fn notices_to_channel(&self, channel: ChannelId) -> Vec<String> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|call| match call {
                RecordedCall::SentToChannel { channel: c, text } if *c == channel => {
                    Some(text.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Messages relayed to a user, oldest first.
    pub async fn relayed_to_user(&self, user: UserId) -> Vec<RelayedMessage> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|call| match call {
                RecordedCall::RelayedToUser { user: u, message } if *u == user => {
                    Some(message.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Messages relayed into a channel, oldest first.
    pub async fn relayed_to_channel(&self, channel: ChannelId) -> Vec<RelayedMessage> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|call| match call {
                RecordedCall::RelayedToChannel {
                    channel: c,
                    message,
                    ..
                } if *c == channel => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    /// Channels created so far, with their initial titles.
    pub async fn created_channels(&self) -> Vec<(ChannelId, String)> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|call| match call {
                RecordedCall::ChannelCreated { channel, title } => Some((*channel, title.clone())),
                _ => None,
            })
            .collect()
    }

    /// Titles a channel was renamed to, oldest first.
    pub async fn renames(&self, channel: ChannelId) -> Vec<String> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|call| match call {
                RecordedCall::ChannelRenamed { channel: c, title } if *c == channel => {
                    Some(title.clone())
                }
                _ => None,
            })
            .collect()
    }

    /// Configure the next call of `op` to fail with the given error.
    pub async fn set_next_error(&self, op: MessengerOp, error: MessengerError) {
        self.next_errors.write().await.insert(op, error);
    }

    /// Clear any pending errors.
    pub async fn clear_next_errors(&self) {
        self.next_errors.write().await.clear();
    }

    /// Make every channel creation fail until switched back.
    pub async fn set_create_channel_down(&self, down: bool) {
        *self.create_channel_down.write().await = down;
    }

    /// Set the simulated latency of relay calls.
    pub async fn set_relay_latency(&self, latency: Duration) {
        *self.relay_latency_ms.write().await = latency.as_millis() as u64;
    }

    async fn take_error(&self, op: MessengerOp) -> Result<(), MessengerError> {
        match self.next_errors.write().await.remove(&op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn simulate_latency(&self) {
        let latency_ms = *self.relay_latency_ms.read().await;
        if latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }
    }

    async fn record(&self, call: RecordedCall) {
        self.calls.write().await.push(call);
    }
}

#[async_trait]
impl Messenger for MockMessenger {
    async fn send_to_user(
        &self,
        user: UserId,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), MessengerError> {
        self.take_error(MessengerOp::SendToUser).await?;
        self.record(RecordedCall::SentToUser {
            user,
            text: text.to_string(),
            buttons: buttons.to_vec(),
        })
        .await;
        Ok(())
    }

    async fn send_to_channel(&self, channel: ChannelId, text: &str) -> Result<(), MessengerError> {
        self.take_error(MessengerOp::SendToChannel).await?;
        self.record(RecordedCall::SentToChannel {
            channel,
            text: text.to_string(),
        })
        .await;
        Ok(())
    }

    async fn relay_to_user(
        &self,
        user: UserId,
        message: &RelayedMessage,
    ) -> Result<(), MessengerError> {
        self.simulate_latency().await;
        self.take_error(MessengerOp::RelayToUser).await?;
        self.record(RecordedCall::RelayedToUser {
            user,
            message: message.clone(),
        })
        .await;
        Ok(())
    }

    async fn relay_to_channel(
        &self,
        channel: ChannelId,
        sender: &UserProfile,
        message: &RelayedMessage,
    ) -> Result<(), MessengerError> {
        self.simulate_latency().await;
        self.take_error(MessengerOp::RelayToChannel).await?;
        self.record(RecordedCall::RelayedToChannel {
            channel,
            sender: sender.id,
            message: message.clone(),
        })
        .await;
        Ok(())
    }

    async fn create_channel(&self, title: &str) -> Result<ChannelId, MessengerError> {
        if *self.create_channel_down.read().await {
            return Err(MessengerError::Api("topic creation is unavailable".to_string()));
        }
        self.take_error(MessengerOp::CreateChannel).await?;

        let channel = {
            let mut next = self.next_channel.write().await;
            let channel = ChannelId(*next);
            *next += 1;
            channel
        };
        self.record(RecordedCall::ChannelCreated {
            channel,
            title: title.to_string(),
        })
        .await;
        Ok(channel)
    }

    async fn rename_channel(&self, channel: ChannelId, title: &str) -> Result<(), MessengerError> {
        self.take_error(MessengerOp::RenameChannel).await?;
        self.record(RecordedCall::ChannelRenamed {
            channel,
            title: title.to_string(),
        })
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_ids_are_sequential() {
        let messenger = MockMessenger::new();
        let a = messenger.create_channel("a").await.unwrap();
        let b = messenger.create_channel("b").await.unwrap();
        assert_eq!(a, ChannelId(100));
        assert_eq!(b, ChannelId(101));
        assert_eq!(messenger.created_channels().await.len(), 2);
    }

    #[tokio::test]
    async fn test_next_error_applies_once() {
        let messenger = MockMessenger::new();
        messenger
            .set_next_error(
                MessengerOp::RelayToUser,
                MessengerError::Unavailable("blocked".to_string()),
            )
            .await;

        let msg = RelayedMessage::text("hi");
        assert!(messenger.relay_to_user(UserId(1), &msg).await.is_err());
        assert!(messenger.relay_to_user(UserId(1), &msg).await.is_ok());
        assert_eq!(messenger.relayed_to_user(UserId(1)).await.len(), 1);
    }
}
