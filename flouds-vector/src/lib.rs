//! Vector data plane for the Flouds gateway
//!
//! Collection schema generation, BM25 sparse encoding, insert with
//! transactional flush, dense/sparse/hybrid (RRF) search, tenant
//! provisioning, and the Milvus RESTful v2 backend client.

pub mod bm25;
pub mod milvus;
pub mod provision;
pub mod schema;
pub mod store;

pub use bm25::Bm25SparseEncoder;
pub use milvus::{MilvusConnector, MilvusHttpBackend};
pub use provision::{ProvisionSummary, Provisioner};
pub use schema::{SchemaManager, SchemaOutcome, SchemaRequest};
pub use store::{InsertOutcome, SearchRequest, VectorStoreEngine};
