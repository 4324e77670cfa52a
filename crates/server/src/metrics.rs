//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the concierge server:
//! - HTTP request metrics (latency, counts)
//! - Telegram polling metrics
//! - Ticket counts and relay workers (collected dynamically)

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use tracing::warn;

use concierge_core::TicketStatus;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "concierge_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("concierge_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "concierge_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

// =============================================================================
// Telegram Metrics
// =============================================================================

/// Updates received from the Bot API, by what they turned into.
pub static TELEGRAM_UPDATES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "concierge_telegram_updates_total",
            "Updates received from the Bot API",
        ),
        &["event"], // "user_message", "channel_message", "command", "ignored"
    )
    .unwrap()
});

/// Failed getUpdates calls; each one triggers a polling restart.
pub static TELEGRAM_POLL_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "concierge_telegram_poll_errors_total",
        "Failed long-poll requests",
    )
    .unwrap()
});

// =============================================================================
// Ticket Metrics (collected dynamically)
// =============================================================================

/// Tickets by current status.
pub static TICKETS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("concierge_tickets_by_status", "Current ticket count by status"),
        &["status"],
    )
    .unwrap()
});

/// Tickets held in the routing registry.
pub static REGISTRY_TICKETS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "concierge_registry_tickets",
        "Tickets indexed by the routing registry",
    )
    .unwrap()
});

/// Live per-conversation relay workers.
pub static RELAY_WORKERS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "concierge_relay_workers_active",
        "Number of live per-conversation relay workers",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();

    // Telegram
    registry
        .register(Box::new(TELEGRAM_UPDATES.clone()))
        .unwrap();
    registry
        .register(Box::new(TELEGRAM_POLL_ERRORS.clone()))
        .unwrap();

    // Tickets and relay
    registry
        .register(Box::new(TICKETS_BY_STATUS.clone()))
        .unwrap();
    registry
        .register(Box::new(REGISTRY_TICKETS.clone()))
        .unwrap();
    registry
        .register(Box::new(RELAY_WORKERS_ACTIVE.clone()))
        .unwrap();

    // Core metrics (ticket lifecycle, relay)
    for metric in concierge_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the store and the relay
/// at scrape time.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    match state.store().count_by_status().await {
        Ok(counts) => {
            for status in TicketStatus::ALL {
                let count = counts.get(&status).copied().unwrap_or(0);
                TICKETS_BY_STATUS
                    .with_label_values(&[status.as_str()])
                    .set(count);
            }
        }
        Err(e) => warn!("Could not count tickets for metrics: {}", e),
    }

    REGISTRY_TICKETS.set(state.registry().len() as i64);
    if let Some(dispatcher) = state.dispatcher() {
        RELAY_WORKERS_ACTIVE.set(dispatcher.active_workers() as i64);
    }
}

/// Normalize a path for metric labels (replace IDs with placeholders).
pub fn normalize_path(path: &str) -> String {
    // Telegram ids are signed, channel ids of supergroups negative.
    let numeric_regex = regex_lite::Regex::new(r"/-?\d+(/|$)").unwrap();
    numeric_regex.replace_all(path, "/{id}$1").to_string()
}
