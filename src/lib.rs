//! Virtual API Server
//!
//! Register "virtual" HTTP endpoints at runtime and answer live traffic
//! against them with dynamically rendered mock responses.
//!
//! # Features
//!
//! - **Dynamic Routing**: `:name` path patterns, first registered match wins
//! - **Request Validation**: Required headers and JSON Schema request bodies
//! - **Response Templates**: `{{body.x}}`, `{{query.x}}`, `{{params.x}}` and
//!   random data such as `{{$randomId}}` or `{{$randomEmail}}`
//! - **Latency Simulation**: Per-endpoint response delay
//! - **Audit Trail**: One record per request, in memory and optionally on disk
//!
//! # Example Configuration
//!
//! ```yaml
//! mount_prefix: /api
//! endpoints:
//!   - path: /users/:id
//!     method: GET
//!     response:
//!       statusCode: 200
//!       body:
//!         id: "{{params.id}}"
//!         name: "{{$randomName}}"
//! ```
//!
//! With this configuration `GET /api/users/42` answers `{"id": "42", "name": ...}`.

pub mod audit;
pub mod config;
pub mod dispatch;
pub mod matcher;
pub mod registry;
pub mod server;
pub mod template;
pub mod validator;

pub use config::{EndpointDefinition, ServerConfig};
pub use dispatch::{Dispatcher, InboundRequest, Reply};
pub use registry::{EndpointRegistry, InMemoryRegistry};
