//! Routes inbound events to tickets and counterparts.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use thiserror::Error;

use crate::config::LifecycleConfig;
use crate::lifecycle::{self, messages, titles, Actor, Effect, LifecycleEvent};
use crate::metrics;
use crate::registry::TicketRegistry;
use crate::ticket::{
    ChannelId, Ticket, TicketError, TicketId, TicketStatus, TicketStore, UserId,
};

use super::locks::KeyedLocks;
use super::messenger::{Messenger, MessengerError};
use super::replies;
use super::types::{
    Button, ButtonAction, Command, CommandName, CommandSource, Direction, InboundEvent,
    RejectReason, RelayOutcome, RelayedMessage, UserProfile,
};

/// Error type for event handling.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Ticket(#[from] TicketError),

    #[error(transparent)]
    Messenger(#[from] MessengerError),

    /// A message arrived in an admin-group chat that backs no ticket.
    #[error("Channel {0} is not bound to any ticket")]
    UnknownChannel(ChannelId),
}

impl RelayError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ticket(TicketError::Database(_)) => "store",
            Self::Ticket(_) => "ticket",
            Self::Messenger(_) => "messenger",
            Self::UnknownChannel(_) => "unknown_channel",
        }
    }
}

/// Creates tickets, relays messages and applies lifecycle commands.
///
/// All work for one user is serialized by a per-user lock, so a close racing
/// a message, or two first messages racing each other, are applied one after
/// the other in arrival order.
pub struct RelayRouter {
    store: Arc<dyn TicketStore>,
    registry: Arc<TicketRegistry>,
    messenger: Arc<dyn Messenger>,
    lifecycle: LifecycleConfig,
    user_locks: KeyedLocks<UserId>,
    /// Users whose next plain message opens a new ticket.
    fresh_requests: Mutex<HashSet<UserId>>,
}

impl RelayRouter {
    pub fn new(
        store: Arc<dyn TicketStore>,
        registry: Arc<TicketRegistry>,
        messenger: Arc<dyn Messenger>,
        lifecycle: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            registry,
            messenger,
            lifecycle,
            user_locks: KeyedLocks::new(),
            fresh_requests: Mutex::new(HashSet::new()),
        }
    }

    pub fn registry(&self) -> &Arc<TicketRegistry> {
        &self.registry
    }

    /// Handle an event, logging failures and telling the sender about them.
    ///
    /// Never fails: one bad event must not stop the relay loop.
    pub async fn process(&self, event: InboundEvent) -> RelayOutcome {
        let kind = event.kind();
        let started = Instant::now();

        let outcome = match self.handle(&event).await {
            Ok(outcome) => outcome,
            Err(RelayError::UnknownChannel(channel)) => {
                tracing::warn!(channel = %channel, "Message in a chat that backs no ticket");
                self.notify_channel(channel, replies::TICKET_NOT_FOUND)
                    .await;
                RelayOutcome::Rejected {
                    ticket_id: None,
                    reason: RejectReason::UnknownChannel,
                }
            }
            Err(e) => self.report_failure(&event, &e).await,
        };

        if let RelayOutcome::Rejected { reason, .. } = &outcome {
            metrics::RELAY_REJECTIONS
                .with_label_values(&[reason.as_str()])
                .inc();
        }
        metrics::EVENT_DURATION
            .with_label_values(&[kind])
            .observe(started.elapsed().as_secs_f64());

        outcome
    }

    /// Handle an event and return what happened.
    pub async fn handle(&self, event: &InboundEvent) -> Result<RelayOutcome, RelayError> {
        match event {
            InboundEvent::UserMessage { user, message } => {
                self.route_from_user(user, message).await
            }
            InboundEvent::ChannelMessage { channel, message } => {
                self.route_from_channel(*channel, message).await
            }
            InboundEvent::Command(command) => self.handle_command(command).await,
        }
    }

    /// Relay a user's plain message, creating a ticket if they have none.
    pub async fn route_from_user(
        &self,
        user: &UserProfile,
        message: &RelayedMessage,
    ) -> Result<RelayOutcome, RelayError> {
        let _guard = self.user_locks.lock(user.id).await;

        if let Some(ticket) = self.registry.open_ticket_for(user.id).await? {
            self.set_fresh_requested(user.id, false);
            let (ticket, channel, provisioned) = self.ensure_channel(ticket, Some(user)).await?;
            if provisioned {
                self.notify_user(user.id, &messages::ticket_created(ticket.id), &[])
                    .await;
            }
            return self.forward_to_channel(&ticket, channel, user, message).await;
        }

        if !self.fresh_requested(user.id) {
            if let Some(latest) = self.registry.latest_ticket_for(user.id).await? {
                return Ok(self.offer_reopen(&latest).await);
            }
        }

        self.create_ticket(user, message).await
    }

    /// Relay an admin's plain message to the ticket owner.
    pub async fn route_from_channel(
        &self,
        channel: ChannelId,
        message: &RelayedMessage,
    ) -> Result<RelayOutcome, RelayError> {
        let owner = self
            .registry
            .ticket_for_channel(channel)
            .await?
            .ok_or(RelayError::UnknownChannel(channel))?
            .user_id;

        let _guard = self.user_locks.lock(owner).await;

        // Status may have changed while waiting for the lock.
        let ticket = self
            .registry
            .ticket_for_channel(channel)
            .await?
            .ok_or(RelayError::UnknownChannel(channel))?;

        if !ticket.status.is_open() {
            self.notify_channel(channel, &replies::channel_ticket_not_open(ticket.id))
                .await;
            return Ok(RelayOutcome::Rejected {
                ticket_id: Some(ticket.id),
                reason: RejectReason::TicketClosed,
            });
        }

        self.messenger.relay_to_user(ticket.user_id, message).await?;
        metrics::MESSAGES_RELAYED
            .with_label_values(&[Direction::ChannelToUser.as_str()])
            .inc();
        tracing::debug!(ticket_id = %ticket.id, "Relayed channel message to user");

        Ok(RelayOutcome::Forwarded {
            ticket_id: ticket.id,
            direction: Direction::ChannelToUser,
        })
    }

    pub async fn handle_command(&self, command: &Command) -> Result<RelayOutcome, RelayError> {
        match &command.source {
            CommandSource::User(user) => self.handle_user_command(user, command).await,
            CommandSource::Channel(channel) => {
                self.handle_channel_command(*channel, command).await
            }
        }
    }

    // ========================================================================
    // User commands
    // ========================================================================

    async fn handle_user_command(
        &self,
        user: &UserProfile,
        command: &Command,
    ) -> Result<RelayOutcome, RelayError> {
        let _guard = self.user_locks.lock(user.id).await;

        match command.name {
            CommandName::Start => {
                match self.registry.open_ticket_for(user.id).await? {
                    Some(ticket) => {
                        self.notify_user(user.id, &replies::welcome_back(ticket.id), &[])
                            .await
                    }
                    None => {
                        self.notify_user(user.id, replies::WELCOME, &[messages::new_ticket_button()])
                            .await
                    }
                }
                Ok(RelayOutcome::Answered)
            }
            CommandName::NewTicket => {
                if let Some(open) = self.registry.open_ticket_for(user.id).await? {
                    self.notify_user(user.id, &replies::already_open(open.id), &[])
                        .await;
                    return Ok(RelayOutcome::Rejected {
                        ticket_id: Some(open.id),
                        reason: RejectReason::AlreadyOpen,
                    });
                }
                self.set_fresh_requested(user.id, true);
                self.notify_user(user.id, replies::DESCRIBE_ISSUE, &[]).await;
                Ok(RelayOutcome::Answered)
            }
            CommandName::Cancel => {
                self.notify_user(user.id, replies::CLOSE_CANCELLED, &[])
                    .await;
                Ok(RelayOutcome::Answered)
            }
            CommandName::Status => {
                match self.registry.latest_ticket_for(user.id).await? {
                    Some(ticket) => {
                        self.notify_user(user.id, &replies::status_report(&ticket), &[])
                            .await
                    }
                    None => {
                        self.notify_user(
                            user.id,
                            replies::NO_TICKETS,
                            &[messages::new_ticket_button()],
                        )
                        .await
                    }
                }
                Ok(RelayOutcome::Answered)
            }
            CommandName::Close | CommandName::Reopen | CommandName::Resolve => {
                let Some(event) = LifecycleEvent::from_command(command.name) else {
                    return Ok(RelayOutcome::Ignored);
                };

                let target = match command.ticket_id {
                    Some(id) => {
                        let ticket = self
                            .registry
                            .ticket(id)
                            .await?
                            .ok_or(TicketError::NotFound(id))?;
                        if ticket.user_id != user.id {
                            self.notify_user(user.id, replies::NOT_YOUR_TICKET, &[])
                                .await;
                            return Ok(RelayOutcome::Rejected {
                                ticket_id: Some(id),
                                reason: RejectReason::NotOwner,
                            });
                        }
                        Some(ticket)
                    }
                    // A typed close asks first; the confirmation button names the ticket.
                    None if event == LifecycleEvent::Close => {
                        if let Some(open) = self.registry.open_ticket_for(user.id).await? {
                            self.notify_user(
                                user.id,
                                &replies::confirm_close(open.id),
                                &messages::close_confirmation_buttons(open.id),
                            )
                            .await;
                            return Ok(RelayOutcome::Answered);
                        }
                        None
                    }
                    None => self.registry.latest_ticket_for(user.id).await?,
                };

                let Some(ticket) = target else {
                    self.notify_user(user.id, replies::NO_TICKET_FOR_COMMAND, &[])
                        .await;
                    return Ok(RelayOutcome::Rejected {
                        ticket_id: None,
                        reason: RejectReason::NoTicket,
                    });
                };

                self.transition(&ticket, event, Actor::User).await
            }
        }
    }

    // ========================================================================
    // Channel commands
    // ========================================================================

    async fn handle_channel_command(
        &self,
        channel: ChannelId,
        command: &Command,
    ) -> Result<RelayOutcome, RelayError> {
        let Some(found) = self.registry.ticket_for_channel(channel).await? else {
            self.notify_channel(channel, replies::NOT_TICKET_CHANNEL)
                .await;
            return Ok(RelayOutcome::Rejected {
                ticket_id: None,
                reason: RejectReason::NotTicketChannel,
            });
        };

        let _guard = self.user_locks.lock(found.user_id).await;
        let ticket = self
            .registry
            .ticket(found.id)
            .await?
            .ok_or(TicketError::NotFound(found.id))?;

        match command.name {
            CommandName::Status => {
                let report = format!(
                    "{}\nUser: {} (user id {})",
                    replies::status_report(&ticket),
                    ticket.user_label,
                    ticket.user_id
                );
                self.notify_channel(channel, &report).await;
                Ok(RelayOutcome::Answered)
            }
            CommandName::Start | CommandName::NewTicket | CommandName::Cancel => {
                self.notify_channel(channel, replies::USER_ONLY_COMMAND)
                    .await;
                Ok(RelayOutcome::Answered)
            }
            CommandName::Close | CommandName::Reopen | CommandName::Resolve => {
                let Some(event) = LifecycleEvent::from_command(command.name) else {
                    return Ok(RelayOutcome::Ignored);
                };
                self.transition(&ticket, event, Actor::Admin).await
            }
        }
    }

    // ========================================================================
    // Ticket creation
    // ========================================================================

    async fn create_ticket(
        &self,
        user: &UserProfile,
        message: &RelayedMessage,
    ) -> Result<RelayOutcome, RelayError> {
        let ticket = match self.store.allocate_ticket(user.id, &user.label()).await {
            Ok(ticket) => ticket,
            Err(TicketError::DuplicateOpenTicket { ticket_id, .. }) => {
                // Another writer got there first; join its ticket.
                tracing::info!(
                    user_id = %user.id,
                    ticket_id = %ticket_id,
                    "Open ticket already exists, routing message into it"
                );
                let existing = self
                    .store
                    .get_ticket(ticket_id)
                    .await?
                    .ok_or(TicketError::NotFound(ticket_id))?;
                self.registry.upsert(&existing);
                self.set_fresh_requested(user.id, false);
                let (existing, channel, _) = self.ensure_channel(existing, Some(user)).await?;
                return self
                    .forward_to_channel(&existing, channel, user, message)
                    .await;
            }
            Err(e) => return Err(e.into()),
        };

        self.registry.upsert(&ticket);
        self.set_fresh_requested(user.id, false);
        metrics::TICKETS_CREATED.inc();
        tracing::info!(
            ticket_id = %ticket.id,
            user_id = %user.id,
            backend = self.store.backend_name(),
            "Ticket created"
        );

        let (ticket, channel, _) = self.ensure_channel(ticket, Some(user)).await?;

        self.messenger
            .relay_to_channel(channel, user, message)
            .await?;
        metrics::MESSAGES_RELAYED
            .with_label_values(&[Direction::UserToChannel.as_str()])
            .inc();

        self.notify_user(user.id, &messages::ticket_created(ticket.id), &[])
            .await;

        Ok(RelayOutcome::Created {
            ticket_id: ticket.id,
        })
    }

    /// Make sure the ticket has a channel, creating and binding one if the
    /// number was allocated but provisioning never finished.
    ///
    /// Returns the (possibly updated) ticket, its channel, and whether the
    /// channel was provisioned by this call.
    async fn ensure_channel(
        &self,
        ticket: Ticket,
        user: Option<&UserProfile>,
    ) -> Result<(Ticket, ChannelId, bool), RelayError> {
        if let Some(channel) = ticket.channel_id {
            return Ok((ticket, channel, false));
        }

        let title = titles::title_for(&ticket);
        let channel = self.messenger.create_channel(&title).await?;

        let bound = match self.store.bind_channel(ticket.id, channel).await {
            Ok(bound) => bound,
            Err(TicketError::ChannelAlreadyBound { channel_id, .. }) => {
                tracing::warn!(
                    ticket_id = %ticket.id,
                    orphaned_channel = %channel,
                    "Ticket was bound concurrently, keeping channel {}",
                    channel_id
                );
                let current = self
                    .store
                    .get_ticket(ticket.id)
                    .await?
                    .ok_or(TicketError::NotFound(ticket.id))?;
                self.registry.upsert(&current);
                return Ok((current, channel_id, false));
            }
            Err(e) => return Err(e.into()),
        };
        self.registry.upsert(&bound);

        tracing::info!(ticket_id = %bound.id, channel = %channel, "Ticket channel bound");

        self.notify_channel(channel, &messages::channel_header(&bound, user))
            .await;

        Ok((bound, channel, true))
    }

    async fn forward_to_channel(
        &self,
        ticket: &Ticket,
        channel: ChannelId,
        user: &UserProfile,
        message: &RelayedMessage,
    ) -> Result<RelayOutcome, RelayError> {
        self.messenger
            .relay_to_channel(channel, user, message)
            .await?;
        metrics::MESSAGES_RELAYED
            .with_label_values(&[Direction::UserToChannel.as_str()])
            .inc();
        tracing::debug!(ticket_id = %ticket.id, "Relayed user message to channel");

        Ok(RelayOutcome::Forwarded {
            ticket_id: ticket.id,
            direction: Direction::UserToChannel,
        })
    }

    /// Plain message while the latest ticket is not open: never create a
    /// duplicate, offer the way back instead.
    async fn offer_reopen(&self, latest: &Ticket) -> RelayOutcome {
        let can_reopen = lifecycle::is_allowed(
            latest.status,
            LifecycleEvent::Reopen,
            Actor::User,
            &self.lifecycle,
        );

        let mut buttons: Vec<Button> = match latest.status {
            TicketStatus::Closed => messages::closed_buttons(latest.id),
            _ if can_reopen => vec![Button::new("Reopen", ButtonAction::Reopen(latest.id))],
            _ => Vec::new(),
        };
        buttons.push(messages::new_ticket_button());

        self.notify_user(
            latest.user_id,
            &replies::ticket_not_open(latest, can_reopen),
            &buttons,
        )
        .await;

        RelayOutcome::Rejected {
            ticket_id: Some(latest.id),
            reason: RejectReason::TicketClosed,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    async fn transition(
        &self,
        ticket: &Ticket,
        event: LifecycleEvent,
        actor: Actor,
    ) -> Result<RelayOutcome, RelayError> {
        let plan = lifecycle::plan(ticket, event, actor, &self.lifecycle)?;

        let updated = self.store.set_status(plan.ticket_id, plan.to).await?;
        self.registry.upsert(&updated);
        if updated.status.is_open() {
            self.set_fresh_requested(updated.user_id, false);
        }

        metrics::TICKET_TRANSITIONS
            .with_label_values(&[plan.from.as_str(), plan.to.as_str()])
            .inc();
        tracing::info!(
            ticket_id = %plan.ticket_id,
            from = %plan.from,
            to = %plan.to,
            ?actor,
            "Ticket {}",
            event.as_str()
        );

        for effect in plan.effects {
            self.perform(effect).await;
        }

        Ok(RelayOutcome::Transitioned {
            ticket_id: plan.ticket_id,
            from: plan.from,
            to: plan.to,
        })
    }

    async fn perform(&self, effect: Effect) {
        match effect {
            Effect::RenameChannel { channel, title } => {
                if let Err(e) = self.messenger.rename_channel(channel, &title).await {
                    tracing::warn!(channel = %channel, "Could not rename channel: {}", e);
                }
            }
            Effect::NotifyUser {
                user,
                text,
                buttons,
            } => self.notify_user(user, &text, &buttons).await,
            Effect::NotifyChannel { channel, text } => self.notify_channel(channel, &text).await,
        }
    }

    // ========================================================================
    // Notices
    // ========================================================================

    /// Tell the sender why their event failed. Refusals the sender can act
    /// on become rejections, everything else is counted as a failure.
    async fn report_failure(&self, event: &InboundEvent, error: &RelayError) -> RelayOutcome {
        let (text, outcome) = match error {
            RelayError::Ticket(TicketError::InvalidTransition {
                ticket_id,
                from,
                to,
            }) => {
                tracing::info!(event = event.kind(), "Transition refused: {}", error);
                (
                    replies::transition_refused(*ticket_id, *from, *to),
                    RelayOutcome::Rejected {
                        ticket_id: Some(*ticket_id),
                        reason: RejectReason::InvalidTransition,
                    },
                )
            }
            RelayError::Ticket(TicketError::DuplicateOpenTicket { ticket_id, .. }) => {
                tracing::info!(event = event.kind(), "Request refused: {}", error);
                let text = match reply_target(event) {
                    ReplyTarget::User(_) => replies::already_open(*ticket_id),
                    ReplyTarget::Channel(_) => replies::user_has_open_ticket(*ticket_id),
                };
                (
                    text,
                    RelayOutcome::Rejected {
                        ticket_id: Some(*ticket_id),
                        reason: RejectReason::AlreadyOpen,
                    },
                )
            }
            other => {
                metrics::RELAY_FAILURES
                    .with_label_values(&[other.kind()])
                    .inc();
                tracing::error!(event = event.kind(), "Failed to handle event: {}", other);
                let text = match (other, event) {
                    (RelayError::Ticket(TicketError::NotFound(_)), _) => {
                        replies::TICKET_NOT_FOUND.to_string()
                    }
                    (RelayError::Messenger(_), InboundEvent::ChannelMessage { channel, .. }) => {
                        match self.channel_ticket_id(*channel).await {
                            Some(id) => replies::delivery_failed(id),
                            None => replies::TRY_AGAIN.to_string(),
                        }
                    }
                    _ => replies::TRY_AGAIN.to_string(),
                };
                (text, RelayOutcome::Ignored)
            }
        };

        match reply_target(event) {
            ReplyTarget::User(user) => self.notify_user(user, &text, &[]).await,
            ReplyTarget::Channel(channel) => self.notify_channel(channel, &text).await,
        }

        outcome
    }

    async fn channel_ticket_id(&self, channel: ChannelId) -> Option<TicketId> {
        self.registry
            .ticket_for_channel(channel)
            .await
            .ok()
            .flatten()
            .map(|ticket| ticket.id)
    }

    async fn notify_user(&self, user: UserId, text: &str, buttons: &[Button]) {
        if let Err(e) = self.messenger.send_to_user(user, text, buttons).await {
            tracing::warn!(user_id = %user, "Could not notify user: {}", e);
        }
    }

    async fn notify_channel(&self, channel: ChannelId, text: &str) {
        if let Err(e) = self.messenger.send_to_channel(channel, text).await {
            tracing::warn!(channel = %channel, "Could not notify channel: {}", e);
        }
    }

    // ========================================================================
    // New-ticket requests
    // ========================================================================

    fn fresh_requested(&self, user: UserId) -> bool {
        self.fresh_requests
            .lock()
            .map(|set| set.contains(&user))
            .unwrap_or(false)
    }

    fn set_fresh_requested(&self, user: UserId, requested: bool) {
        let mut set = self
            .fresh_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if requested {
            set.insert(user);
        } else {
            set.remove(&user);
        }
    }
}

enum ReplyTarget {
    User(UserId),
    Channel(ChannelId),
}

fn reply_target(event: &InboundEvent) -> ReplyTarget {
    match event {
        InboundEvent::UserMessage { user, .. } => ReplyTarget::User(user.id),
        InboundEvent::ChannelMessage { channel, .. } => ReplyTarget::Channel(*channel),
        InboundEvent::Command(Command {
            source: CommandSource::User(user),
            ..
        }) => ReplyTarget::User(user.id),
        InboundEvent::Command(Command {
            source: CommandSource::Channel(channel),
            ..
        }) => ReplyTarget::Channel(*channel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fixtures, MessengerOp};

    async fn open_ticket_for_alice(h: &fixtures::Harness) -> Ticket {
        let outcome = h
            .router
            .process(fixtures::user_message(1, "alice", "help"))
            .await;
        assert!(matches!(outcome, RelayOutcome::Created { .. }));
        h.store.get_open_ticket(UserId(1)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_creation_posts_header_before_first_message() {
        let h = fixtures::harness();
        let ticket = open_ticket_for_alice(&h).await;
        let channel = ticket.channel_id.unwrap();

        let calls = h.messenger.calls().await;
        let header = calls
            .iter()
            .position(|c| matches!(c, crate::testing::RecordedCall::SentToChannel { .. }))
            .unwrap();
        let relay = calls
            .iter()
            .position(|c| matches!(c, crate::testing::RecordedCall::RelayedToChannel { .. }))
            .unwrap();
        assert!(header < relay);
        assert_eq!(
            h.messenger.notices_to_channel(channel).await[0],
            "New ticket #1 from alice (user id 1)"
        );
    }

    #[tokio::test]
    async fn test_message_in_stale_channel_is_answered() {
        let h = fixtures::harness();
        let outcome = h
            .router
            .process(fixtures::channel_message(ChannelId(777), "are you still there?"))
            .await;

        assert_eq!(
            outcome,
            RelayOutcome::Rejected {
                ticket_id: None,
                reason: RejectReason::UnknownChannel
            }
        );
        assert_eq!(
            h.messenger.notices_to_channel(ChannelId(777)).await,
            vec![replies::TICKET_NOT_FOUND]
        );
        assert!(h.messenger.relayed_to_user(UserId(1)).await.is_empty());
    }

    #[tokio::test]
    async fn test_command_outside_ticket_channels_is_answered() {
        let h = fixtures::harness();
        let outcome = h
            .router
            .process(fixtures::channel_command(ChannelId(1), CommandName::Close))
            .await;

        assert_eq!(
            outcome,
            RelayOutcome::Rejected {
                ticket_id: None,
                reason: RejectReason::NotTicketChannel
            }
        );
        assert_eq!(
            h.messenger.notices_to_channel(ChannelId(1)).await,
            vec![replies::NOT_TICKET_CHANNEL]
        );
    }

    #[tokio::test]
    async fn test_refused_transition_tells_requester() {
        let h = fixtures::harness();
        let ticket = open_ticket_for_alice(&h).await;

        let outcome = h
            .router
            .process(fixtures::user_command(1, "alice", CommandName::Resolve))
            .await;

        assert_eq!(
            outcome,
            RelayOutcome::Rejected {
                ticket_id: Some(ticket.id),
                reason: RejectReason::InvalidTransition
            }
        );
        let notices = h.messenger.notices_to_user(UserId(1)).await;
        assert_eq!(
            notices.last().unwrap(),
            &replies::transition_refused(ticket.id, TicketStatus::Open, TicketStatus::Resolved)
        );
        let stored = h.store.get_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Open);
    }

    #[tokio::test]
    async fn test_close_without_ticket() {
        let h = fixtures::harness();
        let outcome = h
            .router
            .process(fixtures::user_command(1, "alice", CommandName::Close))
            .await;

        assert_eq!(
            outcome,
            RelayOutcome::Rejected {
                ticket_id: None,
                reason: RejectReason::NoTicket
            }
        );
        assert_eq!(
            h.messenger.notices_to_user(UserId(1)).await,
            vec![replies::NO_TICKET_FOR_COMMAND]
        );
    }

    #[tokio::test]
    async fn test_button_for_foreign_ticket_is_refused() {
        let h = fixtures::harness();
        let ticket = open_ticket_for_alice(&h).await;

        let outcome = h
            .router
            .process(fixtures::button_press(
                2,
                "mallory",
                ButtonAction::Close(ticket.id),
            ))
            .await;

        assert_eq!(
            outcome,
            RelayOutcome::Rejected {
                ticket_id: Some(ticket.id),
                reason: RejectReason::NotOwner
            }
        );
        let stored = h.store.get_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Open);
    }

    #[tokio::test]
    async fn test_failed_delivery_to_user_is_reported_in_channel() {
        let h = fixtures::harness();
        let ticket = open_ticket_for_alice(&h).await;
        let channel = ticket.channel_id.unwrap();

        h.messenger
            .set_next_error(
                MessengerOp::RelayToUser,
                MessengerError::Unavailable("bot was blocked by the user".to_string()),
            )
            .await;
        let outcome = h
            .router
            .process(fixtures::channel_message(channel, "hello?"))
            .await;

        assert_eq!(outcome, RelayOutcome::Ignored);
        let notices = h.messenger.notices_to_channel(channel).await;
        assert_eq!(notices.last().unwrap(), &replies::delivery_failed(ticket.id));
    }

    #[tokio::test]
    async fn test_new_ticket_refused_while_open() {
        let h = fixtures::harness();
        let ticket = open_ticket_for_alice(&h).await;

        let outcome = h
            .router
            .process(fixtures::user_command(1, "alice", CommandName::NewTicket))
            .await;

        assert_eq!(
            outcome,
            RelayOutcome::Rejected {
                ticket_id: Some(ticket.id),
                reason: RejectReason::AlreadyOpen
            }
        );
    }

    #[tokio::test]
    async fn test_new_ticket_after_close_opens_fresh_ticket() {
        let h = fixtures::harness();
        let first = open_ticket_for_alice(&h).await;
        h.router
            .process(fixtures::button_press(1, "alice", ButtonAction::Close(first.id)))
            .await;

        let outcome = h
            .router
            .process(fixtures::user_command(1, "alice", CommandName::NewTicket))
            .await;
        assert_eq!(outcome, RelayOutcome::Answered);

        let outcome = h
            .router
            .process(fixtures::user_message(1, "alice", "another problem"))
            .await;
        assert_eq!(
            outcome,
            RelayOutcome::Created {
                ticket_id: TicketId(first.id.0 + 1)
            }
        );

        // The flag is one-shot.
        h.router
            .process(fixtures::button_press(
                1,
                "alice",
                ButtonAction::Close(TicketId(first.id.0 + 1)),
            ))
            .await;
        let outcome = h
            .router
            .process(fixtures::user_message(1, "alice", "one more"))
            .await;
        assert!(matches!(outcome, RelayOutcome::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_reopen_clears_pending_new_ticket_request() {
        let h = fixtures::harness();
        let first = open_ticket_for_alice(&h).await;
        h.router
            .process(fixtures::button_press(1, "alice", ButtonAction::Close(first.id)))
            .await;
        h.router
            .process(fixtures::user_command(1, "alice", CommandName::NewTicket))
            .await;

        let outcome = h
            .router
            .process(fixtures::button_press(1, "alice", ButtonAction::Reopen(first.id)))
            .await;
        assert!(matches!(outcome, RelayOutcome::Transitioned { .. }));
        assert!(!h.router.fresh_requested(UserId(1)));

        h.router
            .process(fixtures::button_press(1, "alice", ButtonAction::Close(first.id)))
            .await;
        let outcome = h
            .router
            .process(fixtures::user_message(1, "alice", "one more thing"))
            .await;

        assert_eq!(
            outcome,
            RelayOutcome::Rejected {
                ticket_id: Some(first.id),
                reason: RejectReason::TicketClosed
            }
        );
        assert!(h.store.get_ticket(TicketId(first.id.0 + 1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_into_open_ticket_clears_new_ticket_request() {
        let h = fixtures::harness();
        let ticket = open_ticket_for_alice(&h).await;
        h.router.set_fresh_requested(UserId(1), true);

        let outcome = h
            .router
            .process(fixtures::user_message(1, "alice", "still here"))
            .await;

        assert_eq!(
            outcome,
            RelayOutcome::Forwarded {
                ticket_id: ticket.id,
                direction: Direction::UserToChannel
            }
        );
        assert!(!h.router.fresh_requested(UserId(1)));
    }

    #[tokio::test]
    async fn test_admin_reopen_blocked_by_other_open_ticket() {
        let h = fixtures::harness();
        let first = open_ticket_for_alice(&h).await;
        let first_channel = first.channel_id.unwrap();
        h.router
            .process(fixtures::button_press(1, "alice", ButtonAction::Close(first.id)))
            .await;
        h.router
            .process(fixtures::user_command(1, "alice", CommandName::NewTicket))
            .await;
        h.router
            .process(fixtures::user_message(1, "alice", "different problem"))
            .await;
        let second = h.store.get_open_ticket(UserId(1)).await.unwrap().unwrap();

        let outcome = h
            .router
            .process(fixtures::channel_command(first_channel, CommandName::Reopen))
            .await;

        assert_eq!(
            outcome,
            RelayOutcome::Rejected {
                ticket_id: Some(second.id),
                reason: RejectReason::AlreadyOpen
            }
        );
        let notices = h.messenger.notices_to_channel(first_channel).await;
        let last = notices.last().unwrap();
        assert_eq!(last, &replies::user_has_open_ticket(second.id));
        assert!(!last.contains("You already have"));
    }

    #[tokio::test]
    async fn test_typed_close_asks_for_confirmation() {
        let h = fixtures::harness();
        let ticket = open_ticket_for_alice(&h).await;

        let outcome = h
            .router
            .process(fixtures::user_command(1, "alice", CommandName::Close))
            .await;

        assert_eq!(outcome, RelayOutcome::Answered);
        let notices = h.messenger.notices_to_user(UserId(1)).await;
        assert_eq!(notices.last().unwrap(), &replies::confirm_close(ticket.id));
        assert_eq!(
            h.messenger.last_buttons_for_user(UserId(1)).await,
            messages::close_confirmation_buttons(ticket.id)
        );
        let stored = h.store.get_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Open);

        let outcome = h
            .router
            .process(fixtures::button_press(1, "alice", ButtonAction::Close(ticket.id)))
            .await;
        assert_eq!(
            outcome,
            RelayOutcome::Transitioned {
                ticket_id: ticket.id,
                from: TicketStatus::Open,
                to: TicketStatus::Closed
            }
        );
    }

    #[tokio::test]
    async fn test_cancel_keeps_ticket_open() {
        let h = fixtures::harness();
        let ticket = open_ticket_for_alice(&h).await;
        h.router
            .process(fixtures::user_command(1, "alice", CommandName::Close))
            .await;

        let outcome = h
            .router
            .process(fixtures::button_press(1, "alice", ButtonAction::Cancel))
            .await;

        assert_eq!(outcome, RelayOutcome::Answered);
        let notices = h.messenger.notices_to_user(UserId(1)).await;
        assert_eq!(notices.last().unwrap(), replies::CLOSE_CANCELLED);
        let stored = h.store.get_ticket(ticket.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TicketStatus::Open);

        let channel = ticket.channel_id.unwrap();
        h.router
            .process(fixtures::channel_command(channel, CommandName::Cancel))
            .await;
        assert_eq!(
            h.messenger.notices_to_channel(channel).await.last().unwrap(),
            replies::USER_ONLY_COMMAND
        );
    }

    #[tokio::test]
    async fn test_status_reports_latest_ticket() {
        let h = fixtures::harness();
        let ticket = open_ticket_for_alice(&h).await;

        let outcome = h
            .router
            .process(fixtures::user_command(1, "alice", CommandName::Status))
            .await;

        assert_eq!(outcome, RelayOutcome::Answered);
        let notices = h.messenger.notices_to_user(UserId(1)).await;
        assert_eq!(notices.last().unwrap(), &replies::status_report(&ticket));
    }

    #[tokio::test]
    async fn test_start_offers_new_ticket_button() {
        let h = fixtures::harness();
        h.router
            .process(fixtures::user_command(1, "alice", CommandName::Start))
            .await;

        assert_eq!(
            h.messenger.notices_to_user(UserId(1)).await,
            vec![replies::WELCOME]
        );
        assert_eq!(
            h.messenger.last_buttons_for_user(UserId(1)).await,
            vec![messages::new_ticket_button()]
        );
    }

    #[tokio::test]
    async fn test_unbound_ticket_is_completed_on_next_message() {
        let h = fixtures::harness();
        h.messenger.set_create_channel_down(true).await;

        let outcome = h
            .router
            .process(fixtures::user_message(1, "alice", "help"))
            .await;
        assert_eq!(outcome, RelayOutcome::Ignored);

        let ticket = h.store.get_open_ticket(UserId(1)).await.unwrap().unwrap();
        assert!(ticket.is_unbound());
        assert_eq!(
            h.messenger.notices_to_user(UserId(1)).await,
            vec![replies::TRY_AGAIN]
        );

        h.messenger.set_create_channel_down(false).await;
        let outcome = h
            .router
            .process(fixtures::user_message(1, "alice", "help again"))
            .await;

        assert_eq!(
            outcome,
            RelayOutcome::Forwarded {
                ticket_id: ticket.id,
                direction: Direction::UserToChannel
            }
        );
        let bound = h.store.get_ticket(ticket.id).await.unwrap().unwrap();
        let channel = bound.channel_id.unwrap();
        assert_eq!(h.registry.cached_user_for_channel(channel), Some(UserId(1)));
        assert_eq!(h.store.list_tickets().await.unwrap().len(), 1);
        assert!(h
            .messenger
            .notices_to_user(UserId(1))
            .await
            .contains(&messages::ticket_created(ticket.id)));
    }
}
