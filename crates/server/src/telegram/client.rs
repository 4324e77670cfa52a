//! Bot API client and the `Messenger` implementation on top of it.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use concierge_core::relay::{Button, Messenger, MessengerError, RelayedMessage, UserProfile};
use concierge_core::{ChannelId, TelegramConfig, UserId};

use super::types::{
    AnswerCallbackQuery, ApiResponse, CreateForumTopic, EditForumTopic, ForumTopic, GetUpdates,
    InlineKeyboardButton, InlineKeyboardMarkup, MessageId, RelayMessage, SendMessage, Update,
};

/// Channel standing for the admin group's General topic.
///
/// Forum topics are identified by the id of their creation message, which is
/// never 1, so the value is free for the topic that has no thread id.
pub const GENERAL_TOPIC: ChannelId = ChannelId(1);

/// Errors reported by the Bot API for recipients that cannot be reached.
const UNREACHABLE_CODES: [i64; 2] = [403, 400];

/// Thin Bot API client.
pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    admin_group_id: i64,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Result<Self, MessengerError> {
        // Long polls hold the request open for poll_timeout_secs.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 15))
            .build()
            .map_err(|e| MessengerError::Request(e.to_string()))?;

        Ok(Self {
            http,
            base_url: format!(
                "{}/bot{}",
                config.api_base_url.trim_end_matches('/'),
                config.bot_token
            ),
            admin_group_id: config.admin_group_id,
        })
    }

    pub fn admin_group_id(&self) -> i64 {
        self.admin_group_id
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> Result<T, MessengerError> {
        let url = format!("{}/{}", self.base_url, method);

        let response: ApiResponse<T> = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| MessengerError::Request(e.without_url().to_string()))?
            .json()
            .await
            .map_err(|e| MessengerError::Request(e.without_url().to_string()))?;

        if !response.ok {
            let description = response
                .description
                .unwrap_or_else(|| "Unknown Bot API error".to_string());
            return Err(classify_error(response.error_code, description));
        }

        response
            .result
            .ok_or_else(|| MessengerError::Api(format!("{} returned no result", method)))
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_secs: u64,
    ) -> Result<Vec<Update>, MessengerError> {
        self.call(
            "getUpdates",
            &GetUpdates {
                offset,
                timeout: timeout_secs,
                allowed_updates: &["message", "callback_query"],
            },
        )
        .await
    }

    /// Stop the client's loading indicator on a pressed button.
    pub async fn answer_callback_query(&self, id: &str) -> Result<(), MessengerError> {
        let _: bool = self
            .call(
                "answerCallbackQuery",
                &AnswerCallbackQuery {
                    callback_query_id: id,
                },
            )
            .await?;
        Ok(())
    }

    async fn send_message(
        &self,
        chat_id: i64,
        thread: Option<i64>,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), MessengerError> {
        let reply_markup = (!buttons.is_empty()).then(|| keyboard(buttons));
        let _: serde_json::Value = self
            .call(
                "sendMessage",
                &SendMessage {
                    chat_id,
                    text,
                    message_thread_id: thread,
                    reply_markup,
                },
            )
            .await?;
        Ok(())
    }

    fn thread_of(channel: ChannelId) -> Option<i64> {
        (channel != GENERAL_TOPIC).then_some(channel.0)
    }
}

#[async_trait]
impl Messenger for TelegramClient {
    async fn send_to_user(
        &self,
        user: UserId,
        text: &str,
        buttons: &[Button],
    ) -> Result<(), MessengerError> {
        self.send_message(user.0, None, text, buttons).await
    }

    async fn send_to_channel(&self, channel: ChannelId, text: &str) -> Result<(), MessengerError> {
        self.send_message(self.admin_group_id, Self::thread_of(channel), text, &[])
            .await
    }

    async fn relay_to_user(
        &self,
        user: UserId,
        message: &RelayedMessage,
    ) -> Result<(), MessengerError> {
        match &message.origin {
            // copyMessage drops the "forwarded from" header.
            Some(origin) => {
                let _: MessageId = self
                    .call(
                        "copyMessage",
                        &RelayMessage {
                            chat_id: user.0,
                            from_chat_id: origin.chat_id,
                            message_id: origin.message_id,
                            message_thread_id: None,
                        },
                    )
                    .await?;
                Ok(())
            }
            None => {
                self.send_message(user.0, None, message.text.as_deref().unwrap_or_default(), &[])
                    .await
            }
        }
    }

    async fn relay_to_channel(
        &self,
        channel: ChannelId,
        sender: &UserProfile,
        message: &RelayedMessage,
    ) -> Result<(), MessengerError> {
        let thread = Self::thread_of(channel);
        match &message.origin {
            Some(origin) => {
                let _: serde_json::Value = self
                    .call(
                        "forwardMessage",
                        &RelayMessage {
                            chat_id: self.admin_group_id,
                            from_chat_id: origin.chat_id,
                            message_id: origin.message_id,
                            message_thread_id: thread,
                        },
                    )
                    .await?;
                Ok(())
            }
            None => {
                let text = format!(
                    "{}: {}",
                    sender.label(),
                    message.text.as_deref().unwrap_or_default()
                );
                self.send_message(self.admin_group_id, thread, &text, &[])
                    .await
            }
        }
    }

    async fn create_channel(&self, title: &str) -> Result<ChannelId, MessengerError> {
        let topic: ForumTopic = self
            .call(
                "createForumTopic",
                &CreateForumTopic {
                    chat_id: self.admin_group_id,
                    name: title,
                },
            )
            .await?;
        debug!(thread_id = topic.message_thread_id, name = %topic.name, "Forum topic created");
        Ok(ChannelId(topic.message_thread_id))
    }

    async fn rename_channel(&self, channel: ChannelId, title: &str) -> Result<(), MessengerError> {
        let _: bool = self
            .call(
                "editForumTopic",
                &EditForumTopic {
                    chat_id: self.admin_group_id,
                    message_thread_id: channel.0,
                    name: title,
                },
            )
            .await?;
        Ok(())
    }
}

fn keyboard(buttons: &[Button]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup {
        inline_keyboard: buttons
            .iter()
            .map(|b| {
                vec![InlineKeyboardButton {
                    text: b.label.clone(),
                    callback_data: b.action.callback_data(),
                }]
            })
            .collect(),
    }
}

fn classify_error(code: Option<i64>, description: String) -> MessengerError {
    let lower = description.to_lowercase();
    let unreachable = lower.contains("blocked")
        || lower.contains("chat not found")
        || lower.contains("user is deactivated");
    match code {
        Some(code) if UNREACHABLE_CODES.contains(&code) && unreachable => {
            MessengerError::Unavailable(description)
        }
        Some(403) => MessengerError::Unavailable(description),
        _ => MessengerError::Api(description),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::{ButtonAction, TicketId};

    #[test]
    fn test_general_topic_has_no_thread() {
        assert_eq!(TelegramClient::thread_of(GENERAL_TOPIC), None);
        assert_eq!(TelegramClient::thread_of(ChannelId(42)), Some(42));
    }

    #[test]
    fn test_keyboard_one_button_per_row() {
        let markup = keyboard(&[
            Button::new("Reopen", ButtonAction::Reopen(TicketId(3))),
            Button::new("Resolve", ButtonAction::Resolve(TicketId(3))),
        ]);
        let json = serde_json::to_value(&markup).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "inline_keyboard": [
                    [{"text": "Reopen", "callback_data": "reopen_3"}],
                    [{"text": "Resolve", "callback_data": "resolve_3"}]
                ]
            })
        );
    }

    #[test]
    fn test_classify_error() {
        assert!(matches!(
            classify_error(Some(403), "Forbidden: bot was blocked by the user".into()),
            MessengerError::Unavailable(_)
        ));
        assert!(matches!(
            classify_error(Some(400), "Bad Request: chat not found".into()),
            MessengerError::Unavailable(_)
        ));
        assert!(matches!(
            classify_error(Some(400), "Bad Request: message text is empty".into()),
            MessengerError::Api(_)
        ));
        assert!(matches!(
            classify_error(None, "Unknown".into()),
            MessengerError::Api(_)
        ));
    }
}
