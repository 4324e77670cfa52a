//! Testing utilities and mock implementations.
//!
//! Routing, lifecycle and concurrency can be exercised end to end against an
//! in-memory store and [`MockMessenger`], without a chat platform.
//!
//! # Example
//!
//! ```rust,ignore
//! use concierge_core::testing::{fixtures, MockMessenger};
//!
//! let harness = fixtures::harness();
//! harness.router.process(fixtures::user_message(1, "alice", "help")).await;
//! ```

mod mock_messenger;

pub use mock_messenger::{MessengerOp, MockMessenger, RecordedCall};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::sync::Arc;

    use crate::config::LifecycleConfig;
    use crate::registry::TicketRegistry;
    use crate::relay::{
        ButtonAction, Command, CommandName, CommandSource, InboundEvent, RelayRouter,
        RelayedMessage, UserProfile,
    };
    use crate::ticket::{ChannelId, RetryPolicy, SqliteTicketStore, TicketId, TicketStore, UserId};

    use super::MockMessenger;

    /// Router wired to an in-memory store and a mock messenger.
    pub struct Harness {
        pub store: Arc<dyn TicketStore>,
        pub registry: Arc<TicketRegistry>,
        pub messenger: Arc<MockMessenger>,
        pub router: Arc<RelayRouter>,
    }

    /// Create a harness with the default lifecycle settings.
    pub fn harness() -> Harness {
        harness_with(LifecycleConfig::default())
    }

    /// Create a harness with custom lifecycle settings.
    pub fn harness_with(lifecycle: LifecycleConfig) -> Harness {
        let store: Arc<dyn TicketStore> = Arc::new(
            SqliteTicketStore::in_memory().expect("in-memory sqlite store"),
        );
        harness_on(store, lifecycle)
    }

    /// Create a harness over an existing store.
    pub fn harness_on(store: Arc<dyn TicketStore>, lifecycle: LifecycleConfig) -> Harness {
        let registry = Arc::new(TicketRegistry::new(Arc::clone(&store), RetryPolicy::none()));
        let messenger = Arc::new(MockMessenger::new());
        let router = Arc::new(RelayRouter::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            messenger.clone(),
            lifecycle,
        ));
        Harness {
            store,
            registry,
            messenger,
            router,
        }
    }

    /// A user with a username.
    pub fn user(id: i64, username: &str) -> UserProfile {
        UserProfile::new(UserId(id)).with_username(username)
    }

    /// Plain text from a user in their private chat.
    pub fn user_message(id: i64, username: &str, text: &str) -> InboundEvent {
        InboundEvent::UserMessage {
            user: user(id, username),
            message: RelayedMessage::text(text),
        }
    }

    /// Plain text from an admin in a channel.
    pub fn channel_message(channel: ChannelId, text: &str) -> InboundEvent {
        InboundEvent::ChannelMessage {
            channel,
            message: RelayedMessage::text(text),
        }
    }

    /// A slash command from a user.
    pub fn user_command(id: i64, username: &str, name: CommandName) -> InboundEvent {
        InboundEvent::Command(Command {
            source: CommandSource::User(user(id, username)),
            name,
            ticket_id: None,
        })
    }

    /// A slash command from an admin in a channel.
    pub fn channel_command(channel: ChannelId, name: CommandName) -> InboundEvent {
        InboundEvent::Command(Command {
            source: CommandSource::Channel(channel),
            name,
            ticket_id: None,
        })
    }

    /// A button press by a user.
    pub fn button_press(id: i64, username: &str, action: ButtonAction) -> InboundEvent {
        InboundEvent::Command(action.into_command(CommandSource::User(user(id, username))))
    }

    /// Shorthand for a ticket id.
    pub fn ticket(id: i64) -> TicketId {
        TicketId(id)
    }
}
