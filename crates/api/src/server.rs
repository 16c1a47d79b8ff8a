use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path as AxumPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use corral_registry::{NodeRegistry, RegistryError};
use corral_types::{HealthStatus, Node};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared request context: the registry plus enough metadata for `/health`.
pub struct AppState {
    pub registry: NodeRegistry,
    pub storage_backend: String,
    pub started_at: Instant,
}

type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new<S: Into<String>>(status: StatusCode, message: S) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let payload = Json(ErrorResponse {
            error: self.message,
        });
        (self.status, payload).into_response()
    }
}

/// The fixed domain-error to transport-status table. Pure: the registry's
/// error text becomes the response body, nothing else changes.
impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        let status = match &err {
            RegistryError::Invalid { .. } => StatusCode::BAD_REQUEST,
            RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
            RegistryError::AlreadyExists { .. } => StatusCode::CONFLICT,
            RegistryError::ListFailed(_) | RegistryError::Internal { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct NodeListResponse {
    pub nodes: Vec<Node>,
    pub total: u64,
}

pub async fn start_server(state: AppState, addr: &str) -> Result<()> {
    let shared = Arc::new(state);
    let app = build_router(shared);
    let listener = bind_listener(addr).await?;
    info!(%addr, "API server listening");
    axum::serve(listener, app)
        .await
        .context("API server terminated unexpectedly")
}

async fn bind_listener(addr: &str) -> Result<tokio::net::TcpListener> {
    if let Ok(socket_addr) = addr.parse::<SocketAddr>() {
        tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("failed to bind API listener on {socket_addr}"))
    } else {
        tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind API listener on {addr}"))
    }
}

pub(crate) fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/nodes", post(handle_create_node).get(handle_list_nodes))
        .route(
            "/nodes/:name",
            get(handle_get_node)
                .put(handle_update_node)
                .delete(handle_delete_node),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_health(State(state): State<SharedState>) -> Json<HealthStatus> {
    let (storage_healthy, node_count) = match state.registry.list_nodes().await {
        Ok(nodes) => (true, nodes.len() as u64),
        Err(_) => (false, 0),
    };

    Json(HealthStatus {
        status: if storage_healthy { "ok" } else { "degraded" },
        storage_backend: state.storage_backend.clone(),
        storage_healthy,
        node_count,
        uptime_seconds: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_create_node(
    State(state): State<SharedState>,
    payload: Result<Json<Node>, JsonRejection>,
) -> Result<(StatusCode, Json<Node>), ApiError> {
    let Json(node) =
        payload.map_err(|err| ApiError::bad_request(format!("invalid request body: {err}")))?;

    state.registry.create_node(&node).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

async fn handle_list_nodes(
    State(state): State<SharedState>,
) -> Result<Json<NodeListResponse>, ApiError> {
    let nodes = state.registry.list_nodes().await?;
    let total = nodes.len() as u64;
    Ok(Json(NodeListResponse { nodes, total }))
}

async fn handle_get_node(
    State(state): State<SharedState>,
    AxumPath(name): AxumPath<String>,
) -> Result<Json<Node>, ApiError> {
    let node = state.registry.get_node(&name).await?;
    Ok(Json(node))
}

async fn handle_update_node(
    State(state): State<SharedState>,
    AxumPath(name): AxumPath<String>,
    payload: Result<Json<Node>, JsonRejection>,
) -> Result<Json<Node>, ApiError> {
    let Json(node) =
        payload.map_err(|err| ApiError::bad_request(format!("invalid request body: {err}")))?;

    // The path parameter names the resource being replaced; a differing
    // body name is rejected before the registry is involved.
    if name != node.name {
        return Err(ApiError::bad_request(format!(
            "path name {name:?} does not match body name {:?}",
            node.name
        )));
    }

    state.registry.update_node(&node).await?;
    Ok(Json(node))
}

async fn handle_delete_node(
    State(state): State<SharedState>,
    AxumPath(name): AxumPath<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete_node(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
