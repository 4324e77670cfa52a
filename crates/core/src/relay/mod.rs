//! Message relay between users and ticket channels.
//!
//! - [`RelayRouter`] decides what each inbound event means for a ticket
//! - [`RelayDispatcher`] keeps events for one conversation in order
//! - [`Messenger`] is the outbound boundary to the chat platform

mod dispatcher;
mod locks;
mod messenger;
pub mod replies;
mod router;
mod types;

pub use dispatcher::{DispatchKey, RelayDispatcher};
pub use locks::{KeyGuard, KeyedLocks};
pub use messenger::{Messenger, MessengerError};
pub use router::{RelayError, RelayRouter};
pub use types::{
    Attachment, Button, ButtonAction, Command, CommandName, CommandSource, Direction,
    InboundEvent, MessageRef, RejectReason, RelayOutcome, RelayedMessage, UserProfile,
};
