//! Long-polling loop turning Bot API updates into relay events.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use concierge_core::relay::{Attachment, ButtonAction, CommandName};
use concierge_core::{
    ChannelId, Command, CommandSource, InboundEvent, RelayDispatcher, RelayedMessage, TicketId,
    UserId, UserProfile,
};

use super::client::{TelegramClient, GENERAL_TOPIC};
use super::types::{CallbackQuery, Message, Update, User};
use crate::metrics::{TELEGRAM_POLL_ERRORS, TELEGRAM_UPDATES};

/// Polls `getUpdates` and feeds the dispatcher until shutdown.
pub struct TelegramPoller {
    client: Arc<TelegramClient>,
    dispatcher: RelayDispatcher,
    poll_timeout_secs: u64,
    restart_delay: Duration,
}

impl TelegramPoller {
    pub fn new(
        client: Arc<TelegramClient>,
        dispatcher: RelayDispatcher,
        poll_timeout_secs: u64,
        restart_delay: Duration,
    ) -> Self {
        Self {
            client,
            dispatcher,
            poll_timeout_secs,
            restart_delay,
        }
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Telegram poller started");
        let admin_group_id = self.client.admin_group_id();
        let mut offset = 0;

        loop {
            let polled = tokio::select! {
                _ = shutdown.changed() => break,
                polled = self.client.get_updates(offset, self.poll_timeout_secs) => polled,
            };

            let updates = match polled {
                Ok(updates) => updates,
                Err(e) => {
                    TELEGRAM_POLL_ERRORS.inc();
                    warn!(
                        "Polling failed, restarting in {:?}: {}",
                        self.restart_delay, e
                    );
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(self.restart_delay) => continue,
                    }
                }
            };

            for update in updates {
                offset = offset.max(update.update_id + 1);

                if let Some(query) = &update.callback_query {
                    if let Err(e) = self.client.answer_callback_query(&query.id).await {
                        debug!("Could not answer callback query: {}", e);
                    }
                }

                match translate(&update, admin_group_id) {
                    Some(event) => {
                        TELEGRAM_UPDATES.with_label_values(&[event.kind()]).inc();
                        self.dispatcher.dispatch(event);
                    }
                    None => {
                        TELEGRAM_UPDATES.with_label_values(&["ignored"]).inc();
                        debug!(update_id = update.update_id, "Ignoring update");
                    }
                }
            }
        }

        info!("Telegram poller stopped");
    }
}

/// Map one update to a relay event, or `None` if the relay does not care.
pub fn translate(update: &Update, admin_group_id: i64) -> Option<InboundEvent> {
    if let Some(query) = &update.callback_query {
        return translate_callback(query, admin_group_id);
    }

    let message = update.message.as_ref()?;
    let from = message.from.as_ref()?;
    if from.is_bot {
        return None;
    }

    if message.chat.kind == "private" {
        let user = profile(from);
        return match command_in(message) {
            Some(parsed) => {
                let (name, ticket_id) = parsed?;
                Some(InboundEvent::Command(Command {
                    source: CommandSource::User(user),
                    name,
                    ticket_id,
                }))
            }
            None => {
                let relayed = relayed(message)?;
                Some(InboundEvent::UserMessage {
                    user,
                    message: relayed,
                })
            }
        };
    }

    if message.chat.id == admin_group_id {
        let channel = channel_of(message);
        return match command_in(message) {
            Some(parsed) => {
                let (name, ticket_id) = parsed?;
                Some(InboundEvent::Command(Command {
                    source: CommandSource::Channel(channel),
                    name,
                    ticket_id,
                }))
            }
            // Admin chatter in the General topic is not meant for any user.
            None if channel == GENERAL_TOPIC => None,
            None => Some(InboundEvent::ChannelMessage {
                channel,
                message: relayed(message)?,
            }),
        };
    }

    None
}

fn translate_callback(query: &CallbackQuery, admin_group_id: i64) -> Option<InboundEvent> {
    let action = ButtonAction::parse(query.data.as_deref()?)?;
    let source = match &query.message {
        Some(message) if message.chat.id == admin_group_id => {
            CommandSource::Channel(channel_of(message))
        }
        _ => CommandSource::User(profile(&query.from)),
    };
    Some(InboundEvent::Command(action.into_command(source)))
}

fn profile(user: &User) -> UserProfile {
    let mut profile = UserProfile::new(UserId(user.id));
    profile.username = user.username.clone();
    profile.first_name = user.first_name.clone();
    profile
}

fn channel_of(message: &Message) -> ChannelId {
    match message.message_thread_id {
        Some(thread) if message.is_topic_message => ChannelId(thread),
        _ => GENERAL_TOPIC,
    }
}

/// `None` if the message is not a command; `Some(None)` for an unknown one.
fn command_in(message: &Message) -> Option<Option<(CommandName, Option<TicketId>)>> {
    let text = message.text.as_deref()?.trim();
    let rest = text.strip_prefix('/')?;

    let mut parts = rest.split_whitespace();
    let word = parts.next().unwrap_or_default();
    // "/close@SupportBot" in groups
    let word = word.split('@').next().unwrap_or_default();

    let Some(name) = CommandName::parse(word) else {
        return Some(None);
    };
    let ticket_id = parts
        .next()
        .map(|arg| arg.trim_start_matches('#'))
        .and_then(|arg| arg.parse().ok())
        .map(TicketId);
    Some(Some((name, ticket_id)))
}

fn relayed(message: &Message) -> Option<RelayedMessage> {
    let mut attachments = Vec::new();
    if let Some(photo) = message.photo.last() {
        attachments.push(Attachment {
            kind: "photo".to_string(),
            file_id: photo.file_id.clone(),
        });
    }
    for (kind, file) in [
        ("document", &message.document),
        ("video", &message.video),
        ("voice", &message.voice),
        ("audio", &message.audio),
        ("sticker", &message.sticker),
    ] {
        if let Some(file) = file {
            attachments.push(Attachment {
                kind: kind.to_string(),
                file_id: file.file_id.clone(),
            });
        }
    }

    let text = message.text.clone().or_else(|| message.caption.clone());
    if text.as_deref().map_or(true, |t| t.trim().is_empty()) && attachments.is_empty() {
        // Service messages (topic created, member joined, ...).
        return None;
    }

    Some(
        RelayedMessage {
            text,
            attachments,
            origin: None,
        }
        .with_origin(message.chat.id, message.message_id),
    )
}
