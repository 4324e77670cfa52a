//! Telegram Bot API transport.

mod client;
mod poller;
mod types;

pub use client::{TelegramClient, GENERAL_TOPIC};
pub use poller::{translate, TelegramPoller};
pub use types::Update;
