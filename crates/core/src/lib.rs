//! Core of the support concierge: ticket storage, routing index, lifecycle
//! rules and the relay between users and the admin group.

pub mod config;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod relay;
pub mod testing;
pub mod ticket;

pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, DatabaseBackend,
    DatabaseConfig, LifecycleConfig, RelayConfig, ResolvedReopenPolicy, SanitizedConfig,
    ServerConfig, TelegramConfig,
};
pub use lifecycle::{Actor, Effect, LifecycleEvent, TransitionPlan};
pub use registry::TicketRegistry;
pub use relay::{
    Button, ButtonAction, Command, CommandName, CommandSource, InboundEvent, Messenger,
    MessengerError, RelayDispatcher, RelayError, RelayOutcome, RelayRouter, RelayedMessage,
    UserProfile,
};
pub use ticket::{
    connect_store, ChannelId, PostgresTicketStore, RetryPolicy, SqliteTicketStore, Ticket,
    TicketError, TicketId, TicketStatus, TicketStore, UserId,
};
