//! Endpoint registry.
//!
//! The data plane only reads through [`EndpointRegistry::find_by_method`].
//! [`InMemoryRegistry`] also carries the management operations.

use crate::config::EndpointDefinition;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Errors raised by registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("endpoint {method} {path} already exists")]
    Conflict { method: String, path: String },

    #[error("endpoint not found: {0}")]
    NotFound(String),

    #[error("invalid endpoint: {0}")]
    Invalid(String),

    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

/// Read interface used by the dispatcher.
#[async_trait]
pub trait EndpointRegistry: Send + Sync {
    /// Definitions registered for `method`, in enumeration order.
    async fn find_by_method(&self, method: &str) -> Result<Vec<Arc<EndpointDefinition>>, RegistryError>;
}

/// Registry held in process memory, in insertion order.
#[derive(Default)]
pub struct InMemoryRegistry {
    endpoints: RwLock<Vec<Arc<EndpointDefinition>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry seeded with `definitions`, in order.
    pub async fn with_endpoints(definitions: Vec<EndpointDefinition>) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for definition in definitions {
            registry.create(definition).await?;
        }
        Ok(registry)
    }

    /// Register a new endpoint, returning it with its assigned id.
    pub async fn create(&self, mut definition: EndpointDefinition) -> Result<Arc<EndpointDefinition>, RegistryError> {
        prepare(&mut definition)?;
        if definition.id.is_empty() {
            definition.id = uuid::Uuid::new_v4().to_string();
        }

        let mut endpoints = self.endpoints.write().await;
        if endpoints.iter().any(|e| e.id == definition.id) {
            return Err(RegistryError::Invalid(format!("duplicate id {}", definition.id)));
        }
        ensure_unique(&endpoints, &definition, None)?;

        let definition = Arc::new(definition);
        endpoints.push(Arc::clone(&definition));
        info!(
            id = %definition.id,
            method = %definition.method,
            path = %definition.path,
            "Endpoint registered"
        );
        Ok(definition)
    }

    /// Replace the endpoint with `id`, keeping its position.
    pub async fn update(&self, id: &str, mut definition: EndpointDefinition) -> Result<Arc<EndpointDefinition>, RegistryError> {
        prepare(&mut definition)?;
        definition.id = id.to_string();

        let mut endpoints = self.endpoints.write().await;
        let index = endpoints
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        ensure_unique(&endpoints, &definition, Some(id))?;

        let definition = Arc::new(definition);
        endpoints[index] = Arc::clone(&definition);
        info!(id = %id, method = %definition.method, path = %definition.path, "Endpoint updated");
        Ok(definition)
    }

    /// Remove the endpoint with `id`.
    pub async fn delete(&self, id: &str) -> Result<Arc<EndpointDefinition>, RegistryError> {
        let mut endpoints = self.endpoints.write().await;
        let index = endpoints
            .iter()
            .position(|e| e.id == id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        let removed = endpoints.remove(index);
        info!(id = %id, "Endpoint deleted");
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<EndpointDefinition>> {
        self.endpoints
            .read()
            .await
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// All endpoints sorted by path.
    pub async fn list(&self) -> Vec<Arc<EndpointDefinition>> {
        let mut endpoints = self.endpoints.read().await.clone();
        endpoints.sort_by(|a, b| a.path.cmp(&b.path));
        endpoints
    }

    pub async fn len(&self) -> usize {
        self.endpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.endpoints.read().await.is_empty()
    }
}

#[async_trait]
impl EndpointRegistry for InMemoryRegistry {
    async fn find_by_method(&self, method: &str) -> Result<Vec<Arc<EndpointDefinition>>, RegistryError> {
        let candidates: Vec<_> = self
            .endpoints
            .read()
            .await
            .iter()
            .filter(|e| e.method.eq_ignore_ascii_case(method))
            .cloned()
            .collect();
        debug!(method = %method, candidates = candidates.len(), "Registry lookup");
        Ok(candidates)
    }
}

fn prepare(definition: &mut EndpointDefinition) -> Result<(), RegistryError> {
    definition.normalize();
    definition
        .validate()
        .map_err(|e| RegistryError::Invalid(e.to_string()))
}

/// Fail if another endpoint already owns `(path, method)`.
fn ensure_unique(
    endpoints: &[Arc<EndpointDefinition>],
    definition: &EndpointDefinition,
    except_id: Option<&str>,
) -> Result<(), RegistryError> {
    let taken = endpoints.iter().any(|e| {
        Some(e.id.as_str()) != except_id
            && e.path == definition.path
            && e.method == definition.method
    });
    if taken {
        return Err(RegistryError::Conflict {
            method: definition.method.clone(),
            path: definition.path.clone(),
        });
    }
    Ok(())
}
