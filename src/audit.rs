//! Audit trail for data-plane requests.
//!
//! One [`RequestLogEntry`] is appended per inbound request. Failure paths
//! await the write; the success path hands it to a detached task. Write
//! failures are only reported through tracing.

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

/// Immutable audit record for one inbound request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestLogEntry {
    pub timestamp: DateTime<Utc>,
    pub method: String,
    /// Request path with the mount prefix stripped
    pub path: String,
    pub request_headers: BTreeMap<String, String>,
    pub request_body: Value,
    pub response_status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched_endpoint_id: Option<String>,
    /// Human-readable failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestLogEntry {
    /// Start a record for a request that has just been received.
    ///
    /// The status defaults to 500 until the request reaches a terminal state.
    pub fn received(method: &str, path: &str, headers: &HeaderMap, body: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            method: method.to_string(),
            path: path.to_string(),
            request_headers: flatten_headers(headers),
            request_body: body,
            response_status: 500,
            matched_endpoint_id: None,
            error: None,
        }
    }

    /// Record the endpoint that matched.
    pub fn matched(&mut self, endpoint_id: &str) {
        self.matched_endpoint_id = Some(endpoint_id.to_string());
    }

    /// Finalize the record with the status sent to the caller.
    pub fn finish(mut self, status: u16, error: Option<String>) -> Self {
        self.response_status = status;
        self.error = error;
        self
    }
}

/// Flatten a header map, joining repeated values with `, `.
fn flatten_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut flat: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        flat.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    flat
}

/// Errors raised by audit sinks.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode audit record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Append-only destination for audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    async fn append(&self, entry: &RequestLogEntry) -> Result<(), AuditError>;
}

/// Bounded in-memory audit log backing the logs view.
pub struct MemoryAuditLog {
    capacity: usize,
    entries: Mutex<VecDeque<RequestLogEntry>>,
}

impl MemoryAuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Most recent entries, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<RequestLogEntry> {
        let entries = self.entries.lock().await;
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditLog {
    fn name(&self) -> &str {
        "memory"
    }

    async fn append(&self, entry: &RequestLogEntry) -> Result<(), AuditError> {
        let mut entries = self.entries.lock().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        Ok(())
    }
}

/// Appends each record as one JSON line to a file.
pub struct JsonLinesAuditLog {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonLinesAuditLog {
    /// Open (or create) the file in append mode.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonLinesAuditLog {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn append(&self, entry: &RequestLogEntry) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Fans records out to every configured sink.
#[derive(Clone, Default)]
pub struct AuditLogger {
    sinks: Arc<Vec<Arc<dyn AuditSink>>>,
}

impl AuditLogger {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self {
            sinks: Arc::new(sinks),
        }
    }

    /// Write the record to every sink and wait for completion.
    ///
    /// Returns the number of sinks that accepted the record.
    pub async fn record(&self, entry: &RequestLogEntry) -> usize {
        let mut written = 0;
        for sink in self.sinks.iter() {
            match sink.append(entry).await {
                Ok(()) => written += 1,
                Err(e) => warn!(
                    sink = sink.name(),
                    method = %entry.method,
                    path = %entry.path,
                    error = %e,
                    "Audit write failed"
                ),
            }
        }
        written
    }

    /// Write the record from a detached task.
    pub fn record_detached(&self, entry: RequestLogEntry) -> JoinHandle<usize> {
        let logger = self.clone();
        tokio::spawn(async move { logger.record(&entry).await })
    }
}
