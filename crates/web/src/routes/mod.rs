use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::AppState;

pub mod ws;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/start", post(start_analysis))
        .route("/stop", post(stop_analysis))
        .route("/moves", post(moves))
        .route("/status", get(status))
        .route("/ws", get(ws::ws_events))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Body shared by every endpoint; absent fields are left out.
#[derive(Debug, Default, Serialize)]
pub struct ApiResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ApiResponse {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::default()
        }
    }

    fn error(error: impl ToString) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct MovesRequest {
    pub moves: Vec<String>,
}

/// Runs a bridge call on the blocking pool. Bridge operations take a
/// synchronous lock and `start`/`stop` wait on the engine process.
async fn with_bridge<T, F>(state: Arc<AppState>, f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> T + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!(error = %e, "Bridge task failed");
            ApiResponse::error(e).into_response_with(StatusCode::INTERNAL_SERVER_ERROR)
        })
}

pub async fn start_analysis(State(state): State<Arc<AppState>>) -> Response {
    match with_bridge(state, |app| app.bridge.start()).await {
        Ok(Ok(())) => ApiResponse::message("Engine started in analysis mode")
            .into_response_with(StatusCode::OK),
        Ok(Err(e)) => ApiResponse::error(e).into_response_with(StatusCode::BAD_REQUEST),
        Err(response) => response,
    }
}

pub async fn stop_analysis(State(state): State<Arc<AppState>>) -> Response {
    match with_bridge(state, |app| app.bridge.stop()).await {
        Ok(Ok(())) => ApiResponse::message("Engine stopped").into_response_with(StatusCode::OK),
        Ok(Err(e)) => ApiResponse::error(e).into_response_with(StatusCode::BAD_REQUEST),
        Err(response) => response,
    }
}

pub async fn moves(
    State(state): State<Arc<AppState>>,
    body: Result<Json<MovesRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(_) => {
            return ApiResponse::error("Invalid input. Please provide a list of SAN moves.")
                .into_response_with(StatusCode::BAD_REQUEST)
        }
    };

    match with_bridge(state, move |app| app.bridge.apply_moves(&request.moves)).await {
        Ok(Ok(echoed)) => ApiResponse::message(format!("Moves sent: {}", echoed.join(" ")))
            .with_data(json!({ "moves": echoed }))
            .into_response_with(StatusCode::OK),
        Ok(Err(e)) => ApiResponse::error(e).into_response_with(StatusCode::BAD_REQUEST),
        Err(response) => response,
    }
}

pub async fn status(State(state): State<Arc<AppState>>) -> Response {
    let status = match with_bridge(state, |app| app.bridge.status()).await {
        Ok(status) => status,
        Err(response) => return response,
    };
    let label = if status.running { "running" } else { "stopped" };
    ApiResponse::default()
        .with_data(json!({
            "status": label,
            "moves": status.moves,
            "fen": status.fen,
            "depth": status.depth,
        }))
        .into_response_with(StatusCode::OK)
}

pub async fn health() -> &'static str {
    "OK"
}
