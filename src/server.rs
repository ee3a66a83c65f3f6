//! HTTP surface.
//!
//! `/_system/*` is the management API; every other request falls through to
//! the data plane.

use crate::audit::{AuditLogger, AuditSink, JsonLinesAuditLog, MemoryAuditLog};
use crate::config::{EndpointDefinition, ServerConfig};
use crate::dispatch::{Dispatcher, InboundRequest};
use crate::registry::{InMemoryRegistry, RegistryError};
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, Request, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Number of audit records returned by the logs view.
const LOGS_PAGE: usize = 50;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<InMemoryRegistry>,
    pub audit_log: Arc<MemoryAuditLog>,
    pub dispatcher: Arc<Dispatcher>,
    pub admin_key: Option<Arc<str>>,
}

impl AppState {
    /// Wire registry, audit sinks and dispatcher from configuration.
    pub async fn from_config(config: &ServerConfig) -> anyhow::Result<Self> {
        let registry = Arc::new(InMemoryRegistry::with_endpoints(config.endpoints.clone()).await?);
        let audit_log = Arc::new(MemoryAuditLog::new(config.audit.capacity));

        let mut sinks: Vec<Arc<dyn AuditSink>> = vec![audit_log.clone()];
        if let Some(path) = &config.audit.file {
            let file = JsonLinesAuditLog::open(path).await?;
            info!(path = %path.display(), "Mirroring audit records to file");
            sinks.push(Arc::new(file));
        }

        let dispatcher = Dispatcher::new(
            registry.clone(),
            AuditLogger::new(sinks),
            config.mount_prefix.clone(),
        )
        .with_settings(config.settings.clone());

        Ok(Self {
            registry,
            audit_log,
            dispatcher: Arc::new(dispatcher),
            admin_key: config.admin.api_key.as_deref().map(Arc::from),
        })
    }
}

/// Build the router with the management API and the data-plane fallback.
pub fn build_router(state: AppState) -> Router {
    let system = Router::new()
        .route("/endpoints", get(list_endpoints))
        .route("/endpoints/{id}", put(update_endpoint).delete(delete_endpoint))
        .route("/create-endpoint", post(create_endpoint))
        .route("/logs", get(list_logs))
        .route("/stats", get(stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth));

    Router::new()
        .nest("/_system", system)
        .fallback(data_plane)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let state = AppState::from_config(&config).await?;
    let endpoints = state.registry.len().await;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen).await?;
    info!(
        addr = %config.listen,
        mount_prefix = %config.mount_prefix,
        endpoints,
        "Virtual API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

/// Data-plane handler for every non-management request.
async fn data_plane(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    query: Result<Query<HashMap<String, String>>, QueryRejection>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // An unparsable query string behaves like an empty one
    let query = query.map(|Query(query)| query).unwrap_or_default();
    let request = InboundRequest {
        method: method.as_str().to_string(),
        path: uri.path().to_string(),
        query,
        headers,
        body,
    };
    state.dispatcher.dispatch(request).await.into_response()
}

/// Require `x-admin-key` to equal the configured key.
async fn admin_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let provided = request
        .headers()
        .get("x-admin-key")
        .and_then(|v| v.to_str().ok());

    match (&state.admin_key, provided) {
        (Some(expected), Some(provided)) if provided == expected.as_ref() => next.run(request).await,
        _ => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Forbidden: Invalid Admin Key" })),
        )
            .into_response(),
    }
}

fn registry_error(err: RegistryError) -> (StatusCode, Json<Value>) {
    let status = match err {
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::Conflict { .. } | RegistryError::Invalid(_) => StatusCode::BAD_REQUEST,
        RegistryError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status, Json(json!({ "error": err.to_string() })))
}

async fn list_endpoints(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.registry.list().await))
}

async fn create_endpoint(
    State(state): State<AppState>,
    Json(mut definition): Json<EndpointDefinition>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    // Ids are always assigned by the registry
    definition.id.clear();
    let created = state.registry.create(definition).await.map_err(registry_error)?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Virtual API Created", "id": created.id })),
    ))
}

async fn update_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(definition): Json<EndpointDefinition>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let updated = state
        .registry
        .update(&id, definition)
        .await
        .map_err(registry_error)?;
    Ok(Json(json!({ "message": "Updated Successfully", "endpoint": updated })))
}

async fn delete_endpoint(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.registry.delete(&id).await.map_err(registry_error)?;
    Ok(Json(json!({ "message": "Deleted" })))
}

async fn list_logs(State(state): State<AppState>) -> Json<Value> {
    Json(json!(state.audit_log.recent(LOGS_PAGE).await))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "endpoints": state.registry.len().await,
        "dispatch": state.dispatcher.stats(),
    }))
}
