//! ABOUTME: Core types, traits, and error taxonomy for the Flouds vector gateway
//! ABOUTME: Foundation layer providing the VectorBackend contract and wire types

pub mod error;
pub mod mocks;
pub mod types;

pub mod traits {
    pub mod backend;
}

// Re-export commonly used types
pub use error::{GatewayError, RateScope, Result};
pub use traits::backend::{BackendConnector, VectorBackend};
pub use types::response::ApiResponse;
pub use types::tenant::TenantCode;
pub use types::vector::{
    CollectionDescription, CollectionSchema, DistanceMetric, EmbeddedVector, IndexKind, SearchHit,
    SparseVector, VectorRow,
};
