use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use tracing::info;

use crate::api::{ClipboardQuery, HealthResponse, SaveRequest, SaveResponse};
use crate::model::ClipboardId;
use crate::store::FallbackStore;
use crate::{bad_request, server_error, unpack_error};

const SAVE_FAILED: &str = "Failed to save content";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FallbackStore>,
}

pub async fn healthcheck() -> impl IntoResponse {
    info!("got healthcheck request");
    Json(HealthResponse { status: "ok".to_owned() })
}

pub async fn get_clipboard(State(state): State<AppState>, Query(qp): Query<ClipboardQuery>) -> Response {
    let id = ClipboardId::new(qp.id.as_deref());

    match state.store.get(&id).await {
        Ok(record) => {
            tracing::debug!(id = %id, timestamp = record.timestamp, "read clipboard");
            (StatusCode::OK, Json(record)).into_response()
        }
        Err(e) => {
            tracing::error!(id = %id, error = %unpack_error(&e), "failed to read clipboard");
            server_error("Failed to load content")
        }
    }
}

// The body is parsed by hand so a missing content type is not a rejection.
pub async fn save_clipboard(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: SaveRequest = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::info!(error = %e, "rejected malformed save request");
            return bad_request(SAVE_FAILED);
        }
    };
    let id = ClipboardId::new(payload.id.as_deref());

    match state.store.set(&id, &payload.content).await {
        Ok(record) => {
            info!(id = %id, bytes = payload.content.len(), timestamp = record.timestamp, "saved clipboard");
            (StatusCode::OK, Json(SaveResponse::saved(record.timestamp))).into_response()
        }
        Err(e) => {
            tracing::error!(id = %id, error = %unpack_error(&e), "failed to save clipboard");
            server_error(SAVE_FAILED)
        }
    }
}
