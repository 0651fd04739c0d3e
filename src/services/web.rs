//! Axum-based HTTP server for the operator channel and train administration.
//!
//! Provides:
//! - GET `/` - Operator WebSocket (see [`super::operator`])
//! - GET `/api/train` - All trains with live state
//! - POST `/api/train` - Create a train
//! - PUT `/api/train` - Update a train
//! - DELETE `/api/train` - Delete a train (body: the train)
//! - POST `/api/train_jump_start` - Place a train into a zone
//! - POST `/api/train_stop` - Stop a train (body: its id)
//!
//! Mutating endpoints answer with an [`OpResult`]; a failed result comes
//! back with status 400.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use log::info;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use super::api::{decode, op_result, RecordId};
use super::operator::ws_handler;
use crate::config::WebConfig;
use crate::error::{InterlockError, OpResult};
use crate::interlocking::Interlocking;
use crate::messages::TrainAtSignal;
use crate::train::{TrainId, TrainRecord, TrainView};

/// State shared by every handler.
pub struct AppState {
    /// The interlocking being served.
    pub interlocking: Arc<Interlocking>,
    /// Operator messages longer than this close the session.
    pub max_message_bytes: usize,
}

// ============================================================================
// Route Handlers
// ============================================================================

fn body_text(body: &Bytes) -> Result<&str, InterlockError> {
    std::str::from_utf8(body).map_err(|e| InterlockError::Malformed(e.to_string()))
}

/// GET /api/train - Returns all trains
async fn list_trains(State(state): State<Arc<AppState>>) -> Json<Vec<TrainView>> {
    Json(state.interlocking.trains())
}

/// POST /api/train - Create a train
///
/// Accepts JSON: `{"name": "Class 20", "slowSpeed": 40, "halfSpeed": 90, "fastSpeed": 160}`
async fn insert_train(State(state): State<Arc<AppState>>, body: Bytes) -> OpResult {
    let result = body_text(&body)
        .and_then(decode::<TrainRecord>)
        .and_then(|record| state.interlocking.insert_train(record));
    op_result(result, |record| vec![record.id.to_string()])
}

/// PUT /api/train - Update a train
async fn update_train(State(state): State<Arc<AppState>>, body: Bytes) -> OpResult {
    let result = body_text(&body)
        .and_then(decode::<TrainRecord>)
        .and_then(|record| state.interlocking.update_train(record));
    OpResult::from(result)
}

/// DELETE /api/train - Delete a train
async fn delete_train(State(state): State<Arc<AppState>>, body: Bytes) -> OpResult {
    let result = body_text(&body)
        .and_then(decode::<RecordId>)
        .and_then(|record| state.interlocking.delete_train(record.id));
    OpResult::from(result)
}

/// POST /api/train_jump_start - Place a train into a zone
///
/// Accepts JSON: `{"trainId": 1, "stretchId": 1, "signalId": 2}`
async fn jump_start(State(state): State<Arc<AppState>>, body: Bytes) -> OpResult {
    let result = body_text(&body)
        .and_then(decode::<TrainAtSignal>)
        .and_then(|request| {
            state
                .interlocking
                .jump_start(request.train_id, request.signal())
        });
    OpResult::from(result)
}

/// POST /api/train_stop - Stop a train
///
/// Accepts JSON: `1`
async fn stop_train(State(state): State<Arc<AppState>>, body: Bytes) -> OpResult {
    let result = body_text(&body)
        .and_then(decode::<TrainId>)
        .and_then(|id| state.interlocking.stop_train(id));
    OpResult::from(result)
}

/// Fallback handler for 404
async fn not_found() -> impl IntoResponse {
    let error = InterlockError::NotFound("route".into());
    (StatusCode::NOT_FOUND, Json(OpResult::err(&error)))
}

// ============================================================================
// Server Builder
// ============================================================================

/// Configuration for the web server
#[derive(Debug, Clone)]
pub struct WebServerConfig {
    /// Address to bind to
    pub addr: SocketAddr,
    /// Whether to enable CORS for all origins
    pub cors_permissive: bool,
    /// Largest accepted HTTP request body
    pub max_request_body_bytes: usize,
    /// Longest accepted operator message
    pub max_message_bytes: usize,
    /// Time allowed to answer an HTTP request
    pub request_timeout: Duration,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self::from_config(&WebConfig::default())
    }
}

impl WebServerConfig {
    /// Create a new config with the given address
    pub fn new(addr: impl Into<SocketAddr>) -> Self {
        Self {
            addr: addr.into(),
            ..Default::default()
        }
    }

    /// Set whether CORS should be permissive
    pub fn cors(mut self, permissive: bool) -> Self {
        self.cors_permissive = permissive;
        self
    }

    /// Create from shared WebConfig
    pub fn from_config(config: &WebConfig) -> Self {
        Self {
            addr: ([0, 0, 0, 0], config.port).into(),
            cors_permissive: config.cors_permissive,
            max_request_body_bytes: config.max_request_body_bytes,
            max_message_bytes: config.max_message_bytes,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// Build the Axum router with all routes
pub fn build_router(interlocking: Arc<Interlocking>, config: &WebServerConfig) -> Router {
    let state = Arc::new(AppState {
        interlocking,
        max_message_bytes: config.max_message_bytes,
    });

    let mut router = Router::new()
        // API routes
        .route(
            "/api/train",
            get(list_trains)
                .post(insert_train)
                .put(update_train)
                .delete(delete_train),
        )
        .route("/api/train_jump_start", post(jump_start))
        .route("/api/train_stop", post(stop_train))
        // Operator channel
        .route("/", get(ws_handler))
        // Fallback
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(config.max_request_body_bytes))
        .layer(TimeoutLayer::new(config.request_timeout))
        .with_state(state);

    // Add CORS if requested
    if config.cors_permissive {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router
}

/// Start the web server
///
/// This function blocks until the server is shut down.
pub async fn run_server(
    interlocking: Arc<Interlocking>,
    config: WebServerConfig,
) -> Result<(), std::io::Error> {
    let router = build_router(interlocking, &config);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    info!("operator server listening on http://{}", config.addr);

    axum::serve(listener, router).await
}
