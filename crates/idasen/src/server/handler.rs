//! HTTP Request Handlers
//!
//! Translate REST requests into desk registry calls.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use desk_runtime::{DeskRegistry, MoveScope};

use super::error::ApiError;
use super::state::AppState;

/// Per-stream queue between the desk actor and an SSE client
const EVENT_QUEUE_CAPACITY: usize = 32;

/// Body of a move request
#[derive(Debug, Clone, Deserialize)]
pub struct MoveRequest {
    /// Target height in millimeters
    pub height: i32,
    /// Optional deadline for this move; the desk's own ceiling still applies
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeightResponse {
    pub height: i32,
}

/// Payload of a `height` server-sent event
#[derive(Debug, Clone, Serialize)]
pub struct HeightEvent {
    pub height: i32,
    pub timestamp: DateTime<Utc>,
}

/// Validate a path address: a Bluetooth MAC, or a UUID on platforms that
/// hide MACs. Returns the canonical form used as registry key.
pub fn parse_address(raw: &str) -> Result<String, ApiError> {
    if is_mac_address(raw) {
        return Ok(raw.to_ascii_uppercase());
    }

    match Uuid::parse_str(raw) {
        Ok(id) => Ok(id.hyphenated().to_string()),
        Err(_) => Err(ApiError::InvalidAddress(raw.to_string())),
    }
}

fn is_mac_address(raw: &str) -> bool {
    let octets: Vec<&str> = raw.split(':').collect();
    octets.len() == 6
        && octets
            .iter()
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit()))
}

/// `GET /v1/desk/{address}`
pub async fn get_height(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<HeightResponse>, ApiError> {
    let address = parse_address(&address)?;
    let height = state.registry().read_height(&address).await?;

    Ok(Json(HeightResponse { height }))
}

/// `PATCH /v1/desk/{address}`
///
/// Resolves once the desk arrived. The move is cancelled if the client
/// goes away before that.
pub async fn move_desk(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Json(request): Json<MoveRequest>,
) -> Result<Json<HeightResponse>, ApiError> {
    let address = parse_address(&address)?;

    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let mut scope = MoveScope::new().with_cancel(cancel);
    if let Some(timeout_ms) = request.timeout_ms {
        scope = scope.with_timeout(Duration::from_millis(timeout_ms));
    }

    tracing::info!(address = %address, target = request.height, "Move requested");
    let height = state
        .registry()
        .move_to(&address, request.height, scope)
        .await?;

    Ok(Json(HeightResponse { height }))
}

/// `GET /v1/desk/{address}/events`
///
/// Runs until the client disconnects or the server shuts down.
pub async fn height_events(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let address = parse_address(&address)?;

    let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
    let id = state.registry().subscribe(&address, tx).await?;
    let subscription = SubscriptionGuard {
        registry: Arc::clone(state.registry()),
        address,
        id,
    };

    let stream = ReceiverStream::new(rx)
        .map(move |height| {
            let _subscription = &subscription;
            Event::default().event("height").json_data(HeightEvent {
                height,
                timestamp: Utc::now(),
            })
        })
        .take_until(state.shutdown_token().clone().cancelled_owned());

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Removes the subscription when the event stream is dropped
struct SubscriptionGuard {
    registry: Arc<DeskRegistry>,
    address: String,
    id: Uuid,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let address = std::mem::take(&mut self.address);
        let id = self.id;

        tokio::spawn(async move {
            if let Err(e) = registry.unsubscribe(&address, id).await {
                tracing::warn!(address = %address, error = %e, "Error unsubscribing event stream");
            }
        });
    }
}
