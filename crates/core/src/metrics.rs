//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Ticket creation and lifecycle transitions
//! - Message relaying, rejections and failures
//! - Event handling latency

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Tickets
// =============================================================================

/// Tickets created.
pub static TICKETS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("concierge_tickets_created_total", "Total tickets created").unwrap()
});

/// Lifecycle transitions applied.
pub static TICKET_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "concierge_ticket_transitions_total",
            "Ticket status transitions",
        ),
        &["from_state", "to_state"],
    )
    .unwrap()
});

// =============================================================================
// Relay
// =============================================================================

/// Messages relayed between users and channels.
pub static MESSAGES_RELAYED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("concierge_messages_relayed_total", "Messages relayed"),
        &["direction"], // "user_to_channel", "channel_to_user"
    )
    .unwrap()
});

/// Events refused with a notice.
pub static RELAY_REJECTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "concierge_relay_rejections_total",
            "Events refused without an error",
        ),
        &["reason"],
    )
    .unwrap()
});

/// Events that failed.
pub static RELAY_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("concierge_relay_failures_total", "Events that failed"),
        &["kind"], // "store", "messenger", "unknown_channel"
    )
    .unwrap()
});

/// Time spent handling one inbound event.
pub static EVENT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "concierge_event_duration_seconds",
            "Duration of inbound event handling",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["event"], // "user_message", "channel_message", "command"
    )
    .unwrap()
});

// =============================================================================
// Registration Helper
// =============================================================================

/// Returns all core metrics for registration with a Prometheus registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TICKETS_CREATED.clone()),
        Box::new(TICKET_TRANSITIONS.clone()),
        Box::new(MESSAGES_RELAYED.clone()),
        Box::new(RELAY_REJECTIONS.clone()),
        Box::new(RELAY_FAILURES.clone()),
        Box::new(EVENT_DURATION.clone()),
    ]
}
