//! Ticket API handlers.
//!
//! Read-only: tickets change only through the relay.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use concierge_core::{ChannelId, Ticket, TicketError, TicketId, TicketStatus};

use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Response for ticket lookups
#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub id: i64,
    pub user_id: i64,
    pub user_label: String,
    pub channel_id: Option<i64>,
    pub status: TicketStatus,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<String>,
}

impl From<Ticket> for TicketResponse {
    fn from(ticket: Ticket) -> Self {
        Self {
            title: concierge_core::lifecycle::title_for(&ticket),
            id: ticket.id.0,
            user_id: ticket.user_id.0,
            channel_id: ticket.channel_id.map(|c| c.0),
            status: ticket.status,
            created_at: ticket.created_at.to_rfc3339(),
            updated_at: ticket.updated_at.to_rfc3339(),
            closed_at: ticket.closed_at.map(|t| t.to_rfc3339()),
            user_label: ticket.user_label,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct TicketErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<TicketErrorResponse>);

fn not_found(what: String) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(TicketErrorResponse { error: what }),
    )
}

fn internal(e: TicketError) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(TicketErrorResponse {
            error: e.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Get a ticket by number
pub async fn get_ticket(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<TicketResponse>, ApiError> {
    match state.store().get_ticket(TicketId(id)).await {
        Ok(Some(ticket)) => Ok(Json(TicketResponse::from(ticket))),
        Ok(None) => Err(not_found(format!("Ticket not found: {}", id))),
        Err(e) => Err(internal(e)),
    }
}

/// Get the ticket bound to a channel
pub async fn get_ticket_by_channel(
    State(state): State<Arc<AppState>>,
    Path(channel_id): Path<i64>,
) -> Result<Json<TicketResponse>, ApiError> {
    match state.store().get_ticket_by_channel(ChannelId(channel_id)).await {
        Ok(Some(ticket)) => Ok(Json(TicketResponse::from(ticket))),
        Ok(None) => Err(not_found(format!(
            "No ticket bound to channel {}",
            channel_id
        ))),
        Err(e) => Err(internal(e)),
    }
}
