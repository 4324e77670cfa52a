//! HTTP surface and Telegram transport of the support concierge.

pub mod api;
pub mod metrics;
pub mod state;
pub mod telegram;
