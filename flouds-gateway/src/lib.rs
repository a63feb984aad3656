//! Multi-tenant HTTP gateway in front of a Milvus-compatible vector database
//!
//! Request flow: CORS → trusted host → auth → rate limit → validation →
//! logging → metrics → route handler → service-method wrapper → backend
//! client from the pool → vector/provisioning engine → response envelope.

pub mod auth;
pub mod bootstrap;
pub mod limits;
pub mod middleware;
pub mod routes;
pub mod service_method;
pub mod state;

pub use bootstrap::{build_gateway, spawn_maintenance, Gateway};
pub use state::AppState;
