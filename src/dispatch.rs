//! Data-plane request dispatch.
//!
//! Sequences matching, validation, rendering and the configured delay for
//! every inbound request, and writes exactly one audit record per request.

use crate::audit::{AuditLogger, RequestLogEntry};
use crate::config::GlobalSettings;
use crate::matcher::{find_match, strip_mount_prefix, RouteMatch};
use crate::registry::{EndpointRegistry, RegistryError};
use crate::template::{TemplateContext, TemplateEngine, TemplateError};
use crate::validator::{validate_request, SchemaViolation, ValidationError};
use axum::body::Bytes;
use axum::http::{header::CONTENT_TYPE, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use futures::FutureExt;
use serde::Serialize;
use serde_json::{json, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Transport-neutral view of an inbound data-plane request.
#[derive(Debug, Clone, Default)]
pub struct InboundRequest {
    pub method: String,
    /// Full request path, mount prefix included
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Status and JSON body sent back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Terminal failure of a data-plane request.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Route not found")]
    RouteNotFound,

    #[error("Malformed JSON body")]
    MalformedBody(#[source] serde_json::Error),

    #[error("Missing Headers")]
    MissingHeaders(Vec<String>),

    #[error("Schema Validation Failed")]
    SchemaValidationFailed(Vec<SchemaViolation>),

    #[error("{0}")]
    TemplateRenderFailed(#[from] TemplateError),

    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Internal(String),
}

impl From<ValidationError> for DispatchError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::MissingHeaders(missing) => Self::MissingHeaders(missing),
            ValidationError::SchemaValidationFailed(violations) => {
                Self::SchemaValidationFailed(violations)
            }
            ValidationError::InvalidSchema(message) => Self::Internal(message),
        }
    }
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::MalformedBody(_) | Self::MissingHeaders(_) | Self::SchemaValidationFailed(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::TemplateRenderFailed(_) | Self::Registry(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Body returned to the caller.
    pub fn reply(&self) -> Reply {
        let body = match self {
            Self::RouteNotFound => json!({ "error": "Virtual API path not found" }),
            Self::MalformedBody(e) => json!({ "error": "Malformed JSON body", "details": e.to_string() }),
            Self::MissingHeaders(missing) => json!({ "error": "Missing headers", "missing": missing }),
            Self::SchemaValidationFailed(violations) => {
                json!({ "error": "Schema validation failed", "details": violations })
            }
            Self::TemplateRenderFailed(_) | Self::Registry(_) | Self::Internal(_) => {
                json!({ "error": "Internal System Error" })
            }
        };
        Reply {
            status: self.status(),
            body,
        }
    }
}

/// Snapshot of the dispatcher counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub requests_total: u64,
    pub requests_matched: u64,
    pub requests_unmatched: u64,
    pub requests_rejected: u64,
}

/// A rendered success response waiting for its delay.
struct Rendered {
    status: StatusCode,
    body: Value,
    delay_ms: u64,
}

/// Data-plane dispatcher.
pub struct Dispatcher {
    registry: Arc<dyn EndpointRegistry>,
    audit: AuditLogger,
    template_engine: TemplateEngine,
    mount_prefix: String,
    settings: GlobalSettings,
    /// Total requests processed.
    requests_total: AtomicU64,
    /// Requests that matched an endpoint.
    requests_matched: AtomicU64,
    /// Requests with no matching endpoint.
    requests_unmatched: AtomicU64,
    /// Matched requests that failed validation.
    requests_rejected: AtomicU64,
}

impl Dispatcher {
    pub fn new(registry: Arc<dyn EndpointRegistry>, audit: AuditLogger, mount_prefix: impl Into<String>) -> Self {
        Self {
            registry,
            audit,
            template_engine: TemplateEngine::new(),
            mount_prefix: mount_prefix.into(),
            settings: GlobalSettings::default(),
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
        }
    }

    pub fn with_settings(mut self, settings: GlobalSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_template_engine(mut self, engine: TemplateEngine) -> Self {
        self.template_engine = engine;
        self
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_matched: self.requests_matched.load(Ordering::Relaxed),
            requests_unmatched: self.requests_unmatched.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
        }
    }

    /// Handle one inbound request to completion.
    pub async fn dispatch(&self, request: InboundRequest) -> Reply {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let method = request.method.to_uppercase();
        let path = strip_mount_prefix(&self.mount_prefix, &request.path);
        let body = parse_body(&request.headers, &request.body);

        let mut entry = RequestLogEntry::received(
            &method,
            &path,
            &request.headers,
            body.as_ref().map(Value::clone).unwrap_or(Value::Null),
        );

        let outcome = match body {
            Ok(body) => AssertUnwindSafe(self.resolve(&method, &path, &request, &body, &mut entry))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(DispatchError::Internal(panic_message(&*panic)))),
            Err(e) => Err(DispatchError::MalformedBody(e)),
        };

        match outcome {
            Ok(rendered) => {
                // Success is logged off the response path
                let entry = entry.finish(rendered.status.as_u16(), None);
                let _ = self.audit.record_detached(entry);

                if rendered.delay_ms > 0 {
                    debug!(method = %method, path = %path, delay_ms = rendered.delay_ms, "Applying delay");
                    tokio::time::sleep(Duration::from_millis(rendered.delay_ms)).await;
                }

                Reply {
                    status: rendered.status,
                    body: rendered.body,
                }
            }
            Err(err) => {
                if err.status().is_server_error() {
                    error!(method = %method, path = %path, error = %err, "Dispatch failed");
                }
                let reply = err.reply();
                let entry = entry.finish(reply.status.as_u16(), Some(err.to_string()));
                self.audit.record(&entry).await;
                reply
            }
        }
    }

    async fn resolve(
        &self,
        method: &str,
        path: &str,
        request: &InboundRequest,
        body: &Value,
        entry: &mut RequestLogEntry,
    ) -> Result<Rendered, DispatchError> {
        let candidates = self.registry.find_by_method(method).await?;

        let Some(RouteMatch { endpoint, params }) = find_match(&candidates, method, path) else {
            self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
            if self.settings.log_unmatched {
                warn!(method = %method, path = %path, "No matching endpoint found");
            }
            return Err(DispatchError::RouteNotFound);
        };

        self.requests_matched.fetch_add(1, Ordering::Relaxed);
        entry.matched(&endpoint.id);
        if self.settings.log_matches {
            info!(
                endpoint_id = %endpoint.id,
                method = %method,
                path = %path,
                "Request matched endpoint"
            );
        }

        if let Err(e) = validate_request(&endpoint, method, &request.headers, body) {
            if !matches!(e, ValidationError::InvalidSchema(_)) {
                self.requests_rejected.fetch_add(1, Ordering::Relaxed);
            }
            return Err(e.into());
        }

        let ctx = TemplateContext {
            body,
            query: &request.query,
            params: &params,
        };
        let rendered = self.template_engine.render_json(&endpoint.response.body, &ctx)?;

        let status = StatusCode::from_u16(endpoint.response.status_code).map_err(|e| {
            DispatchError::Internal(format!(
                "invalid status code {}: {}",
                endpoint.response.status_code, e
            ))
        })?;

        Ok(Rendered {
            status,
            body: rendered,
            delay_ms: endpoint.response.delay,
        })
    }
}

/// Parse the request body.
///
/// Only JSON content types are parsed; an empty or non-JSON body is `{}`.
fn parse_body(headers: &HeaderMap, raw: &[u8]) -> Result<Value, serde_json::Error> {
    if !is_json_content_type(headers) || raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_slice(raw)
}

/// `application/json` or any `application/*+json` type, parameters ignored.
fn is_json_content_type(headers: &HeaderMap) -> bool {
    let Some(mime) = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
    else {
        return false;
    };

    let mime = mime.trim().to_ascii_lowercase();
    mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json"))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("dispatch panicked: {}", detail)
}
