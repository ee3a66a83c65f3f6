//! Configuration for the virtual API server.
//!
//! Defines endpoint definitions, response templates, and server settings.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// HTTP methods an endpoint may be registered for.
pub const SUPPORTED_METHODS: &[&str] = &[
    "GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS",
];

/// Main configuration for the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Prefix stripped from data-plane paths before matching
    #[serde(default = "default_mount_prefix")]
    pub mount_prefix: String,

    /// Management API settings
    #[serde(default)]
    pub admin: AdminSettings,

    /// Audit trail settings
    #[serde(default)]
    pub audit: AuditSettings,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,

    /// Endpoints registered at startup, in order
    #[serde(default)]
    pub endpoints: Vec<EndpointDefinition>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            mount_prefix: default_mount_prefix(),
            admin: AdminSettings::default(),
            audit: AuditSettings::default(),
            settings: GlobalSettings::default(),
            endpoints: Vec::new(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 3000))
}

fn default_mount_prefix() -> String {
    "/api".to_string()
}

impl ServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let mut config: Self = serde_yaml::from_str(yaml)?;
        for endpoint in &mut config.endpoints {
            endpoint.normalize();
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.mount_prefix.is_empty() && !self.mount_prefix.starts_with('/') {
            anyhow::bail!("mount_prefix must start with '/': {}", self.mount_prefix);
        }

        let mut seen = HashSet::new();
        for (i, endpoint) in self.endpoints.iter().enumerate() {
            endpoint
                .validate()
                .map_err(|e| anyhow::anyhow!("Endpoint {}: {}", i, e))?;
            let key = (endpoint.path.as_str(), endpoint.method.to_uppercase());
            if !seen.insert(key) {
                anyhow::bail!(
                    "Endpoint {}: duplicate definition for {} {}",
                    i,
                    endpoint.method,
                    endpoint.path
                );
            }
        }
        Ok(())
    }
}

/// An operator-registered virtual API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EndpointDefinition {
    /// Registry-assigned identifier
    #[serde(default)]
    pub id: String,

    /// Route pattern, e.g. `/users/:id`
    pub path: String,

    /// HTTP method (canonicalized to uppercase)
    pub method: String,

    /// JSON Schema the request body must satisfy
    #[serde(default)]
    pub body_schema: Option<serde_json::Value>,

    /// Headers the request must carry
    #[serde(default)]
    pub required_headers: Vec<String>,

    /// Response to return
    #[serde(default)]
    pub response: ResponseDefinition,
}

impl EndpointDefinition {
    /// Create a definition with an empty `{}` 200 response.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        let mut definition = Self {
            id: String::new(),
            path: path.into(),
            method: method.into(),
            body_schema: None,
            required_headers: Vec::new(),
            response: ResponseDefinition::default(),
        };
        definition.normalize();
        definition
    }

    /// Canonicalize fields that have a single accepted spelling.
    pub fn normalize(&mut self) {
        self.method = self.method.trim().to_uppercase();
        self.path = self.path.trim().to_string();
        if matches!(self.body_schema, Some(serde_json::Value::Null)) {
            self.body_schema = None;
        }
    }

    /// Validate the endpoint definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.path.starts_with('/') {
            anyhow::bail!("path must start with '/': {:?}", self.path);
        }
        if self.path.split('/').any(|segment| segment == ":") {
            anyhow::bail!("path parameter without a name in {:?}", self.path);
        }
        let method = self.method.to_uppercase();
        if !SUPPORTED_METHODS.contains(&method.as_str()) {
            anyhow::bail!("unsupported method: {:?}", self.method);
        }
        if let Some(schema) = &self.body_schema {
            crate::validator::compile_schema(schema)
                .map_err(|e| anyhow::anyhow!("invalid bodySchema: {}", e))?;
        }
        self.response.validate()?;
        Ok(())
    }
}

/// Response definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ResponseDefinition {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status_code: u16,

    /// Response body template
    #[serde(default = "default_body")]
    pub body: serde_json::Value,

    /// Delay before responding, in milliseconds
    #[serde(default)]
    pub delay: u64,
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self {
            status_code: default_status(),
            body: default_body(),
            delay: 0,
        }
    }
}

fn default_status() -> u16 {
    200
}

fn default_body() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl ResponseDefinition {
    /// Validate the response definition.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.status_code < 100 || self.status_code > 599 {
            anyhow::bail!("Invalid status code: {}", self.status_code);
        }
        Ok(())
    }
}

/// Management API settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdminSettings {
    /// Value expected in the `x-admin-key` header
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Audit trail settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditSettings {
    /// Number of records kept in memory for the logs view
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Optional JSON-lines file every record is appended to
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            file: None,
        }
    }
}

fn default_capacity() -> usize {
    1000
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log matched requests
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
        }
    }
}

fn default_true() -> bool {
    true
}
