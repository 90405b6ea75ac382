//! API Server module
//!
//! This module provides the HTTP API server over a shared analysis [`Core`].

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::assist::AssistRequest;
use crate::models::{
    ActionField, AnalysisError, AnalysisResponse, AnalysisUpdate, DeleteOutcome, NodeUpdate,
    Relation,
};
use crate::Core;

/// Request to add a node next to or below a target
#[derive(Serialize, Deserialize)]
pub struct AddNodeRequest {
    pub target_id: String,
    pub relation: Relation,
}

/// Request to replace one field of an action
#[derive(Serialize, Deserialize)]
pub struct SetActionFieldRequest {
    pub field: ActionField,
    pub value: String,
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub address: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 3000).into(),
        }
    }
}

/// API responses
#[derive(Serialize, Deserialize)]
pub struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn into_parts(self) -> (Option<T>, Option<String>) {
        (self.data, self.error)
    }
}

fn ok<T: Serialize>(response: AnalysisResponse<T>) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(response))).into_response()
}

fn fail(status: StatusCode, message: String) -> Response {
    (status, Json(ApiResponse::<()>::error(message))).into_response()
}

/// Maps a present value to 200 and an absent one to 404
fn found_or_404<T: Serialize>(response: AnalysisResponse<Option<T>>, what: &str) -> Response {
    if response.inner().is_some() {
        ok(response)
    } else {
        fail(StatusCode::NOT_FOUND, format!("{} not found", what))
    }
}

/// Maps a changed flag to 200 and an unchanged one to 404
fn changed_or_404(response: AnalysisResponse<bool>, what: &str) -> Response {
    if *response.inner() {
        ok(response)
    } else {
        fail(StatusCode::NOT_FOUND, format!("{} not found", what))
    }
}

fn map_analysis_error(error: AnalysisError) -> Response {
    let status = match error {
        AnalysisError::AlreadyGenerating => StatusCode::CONFLICT,
        AnalysisError::MissingNodeId(_) => StatusCode::BAD_REQUEST,
    };
    fail(status, error.to_string())
}

/// Builds the application router
pub fn router(core: Core) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // --- Analysis --- //
        .route("/api/analysis", get(get_analysis).patch(update_analysis))
        .route("/api/distilled", get(get_distilled_context))
        .route("/api/context", get(get_forest_context))
        // --- Nodes --- //
        .route("/api/nodes", post(add_node))
        .route(
            "/api/nodes/:id",
            get(get_node).patch(update_node).delete(delete_node),
        )
        .route("/api/nodes/:id/path", get(get_path))
        .route("/api/nodes/:id/actions", post(add_action))
        .route(
            "/api/nodes/:id/actions/:index",
            patch(update_action).delete(remove_action),
        )
        // --- Analysis-wide actions --- //
        .route("/api/ultimate/actions", post(add_ultimate_action))
        .route(
            "/api/ultimate/actions/:index",
            patch(update_ultimate_action).delete(remove_ultimate_action),
        )
        // --- Assistance --- //
        .route("/api/assist", post(assist))
        .route("/api/report", get(get_report))
        .route("/report", get(report_page))
        .route("/api/events", get(events_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(core)
}

/// Starts the API server
pub async fn serve(core: Core, config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing; a subscriber may already be installed by the host
    let _ = tracing_subscriber::fmt().try_init();

    let app = router(core);

    // Start server
    tracing::info!("Starting server on {}", config.address);
    let listener = TcpListener::bind(config.address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// --- Analysis Handlers --- //

async fn get_analysis(State(core): State<Core>) -> impl IntoResponse {
    ok(core.get_analysis())
}

async fn update_analysis(
    State(core): State<Core>,
    Json(payload): Json<AnalysisUpdate>,
) -> impl IntoResponse {
    ok(core.update_analysis(payload))
}

async fn get_distilled_context(State(core): State<Core>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(ApiResponse::success(core.distilled_context())),
    )
}

async fn get_forest_context(State(core): State<Core>) -> impl IntoResponse {
    ok(core.forest_context())
}

// --- Node Handlers --- //

async fn add_node(
    State(core): State<Core>,
    Json(payload): Json<AddNodeRequest>,
) -> impl IntoResponse {
    let response = core.add_node(&payload.target_id, payload.relation);
    found_or_404(response, &format!("Node '{}'", payload.target_id))
}

async fn get_node(State(core): State<Core>, Path(id): Path<String>) -> impl IntoResponse {
    found_or_404(core.find_node(&id), &format!("Node '{}'", id))
}

async fn update_node(
    State(core): State<Core>,
    Path(id): Path<String>,
    Json(payload): Json<NodeUpdate>,
) -> impl IntoResponse {
    changed_or_404(core.update_node(&id, payload), &format!("Node '{}'", id))
}

async fn delete_node(State(core): State<Core>, Path(id): Path<String>) -> impl IntoResponse {
    let response = core.delete_node(&id);
    match *response.inner() {
        DeleteOutcome::Deleted => ok(response.replace(true)),
        DeleteOutcome::LastProblem => fail(
            StatusCode::CONFLICT,
            "Cannot delete the last problem".to_string(),
        ),
        DeleteOutcome::NotFound => {
            fail(StatusCode::NOT_FOUND, format!("Node '{}' not found", id))
        }
    }
}

async fn get_path(State(core): State<Core>, Path(id): Path<String>) -> impl IntoResponse {
    found_or_404(core.path_to(&id), &format!("Node '{}'", id))
}

async fn add_action(State(core): State<Core>, Path(id): Path<String>) -> impl IntoResponse {
    changed_or_404(core.add_action(&id), &format!("Node '{}'", id))
}

async fn update_action(
    State(core): State<Core>,
    Path((id, index)): Path<(String, usize)>,
    Json(payload): Json<SetActionFieldRequest>,
) -> impl IntoResponse {
    let response = core.update_action(&id, index, payload.field, payload.value);
    changed_or_404(response, &format!("Action {} on node '{}'", index, id))
}

async fn remove_action(
    State(core): State<Core>,
    Path((id, index)): Path<(String, usize)>,
) -> impl IntoResponse {
    changed_or_404(
        core.remove_action(&id, index),
        &format!("Action {} on node '{}'", index, id),
    )
}

async fn add_ultimate_action(State(core): State<Core>) -> impl IntoResponse {
    ok(core.add_ultimate_action())
}

async fn update_ultimate_action(
    State(core): State<Core>,
    Path(index): Path<usize>,
    Json(payload): Json<SetActionFieldRequest>,
) -> impl IntoResponse {
    let response = core.update_ultimate_action(index, payload.field, payload.value);
    changed_or_404(response, &format!("Action {}", index))
}

async fn remove_ultimate_action(
    State(core): State<Core>,
    Path(index): Path<usize>,
) -> impl IntoResponse {
    changed_or_404(
        core.remove_ultimate_action(index),
        &format!("Action {}", index),
    )
}

// --- Assistance Handlers --- //

async fn assist(
    State(core): State<Core>,
    Json(payload): Json<AssistRequest>,
) -> impl IntoResponse {
    let target = payload.node_id.clone().unwrap_or_default();
    match core.assist(payload).await {
        Ok(response) => found_or_404(response, &format!("Node '{}'", target)),
        Err(e) => map_analysis_error(e),
    }
}

async fn get_report(State(core): State<Core>) -> impl IntoResponse {
    found_or_404(core.last_report(), "Report")
}

async fn report_page(State(core): State<Core>) -> impl IntoResponse {
    match core.last_report().into_inner() {
        Some(report) => Html(report).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Html("<p>No report has been generated yet.</p>".to_string()),
        )
            .into_response(),
    }
}

// --- Event Handlers --- //

async fn events_handler(State(core): State<Core>) -> impl IntoResponse {
    let receiver = core.subscribe();
    let stream = EventStream::new(core.clone(), receiver);

    // Set headers for event stream
    let headers = [
        (
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("text/event-stream"),
        ),
        (
            axum::http::header::CACHE_CONTROL,
            axum::http::HeaderValue::from_static("no-cache"),
        ),
    ];

    (headers, axum::body::Body::from_stream(stream))
}

const UPDATE_EVENT: &str = "event: update\ndata: change\n\n";

struct EventStream {
    core: Core,
    receiver: tokio::sync::broadcast::Receiver<()>,
}

impl EventStream {
    fn new(core: Core, receiver: tokio::sync::broadcast::Receiver<()>) -> Self {
        Self { core, receiver }
    }
}

impl Stream for EventStream {
    type Item = Result<String, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.receiver.try_recv() {
            Ok(()) => Poll::Ready(Some(Ok(UPDATE_EVENT.to_string()))),
            Err(tokio::sync::broadcast::error::TryRecvError::Empty) => {
                // Nothing queued; poll again shortly
                let waker = cx.waker().clone();
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    waker.wake();
                });
                Poll::Pending
            }
            // Missed notifications collapse into a single change event
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => {
                Poll::Ready(Some(Ok(UPDATE_EVENT.to_string())))
            }
            Err(tokio::sync::broadcast::error::TryRecvError::Closed) => {
                self.receiver = self.core.subscribe();
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }
}
