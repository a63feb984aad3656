//! Vector backend contract
//!
//! Defines the abstractions the gateway uses to talk to a Milvus-compatible
//! vector engine:
//! - `VectorBackend`: a credentialed client bound to one `(uri, user, database)`
//! - `BackendConnector`: the factory the connection pool calls on a cache miss
//!
//! The engine itself is an external collaborator; only this contract is
//! implemented in-tree (an HTTP client in `flouds-vector` and an in-memory
//! mock in [`crate::mocks`]).

use crate::error::Result;
use crate::types::vector::{
    CollectionDescription, CollectionSchema, SearchHit, SparseVector, VectorRow,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Collection privileges granted to tenant roles
pub const COLLECTION_PRIVILEGES: &[&str] = &["Search", "Query", "Insert", "Upsert", "Delete"];

/// A long-lived client bound to one backend database with fixed credentials
///
/// All calls are network RPCs and may block on I/O; callers must never hold
/// a lock across them. Failures during operations on an established client
/// surface as `GatewayError::Operation`; transport-level failures surface as
/// `GatewayError::Connection`.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    /// Cheap reachability probe used by health checks
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Connection` when the engine is unreachable.
    async fn ping(&self) -> Result<()>;

    /// List logical databases visible to the bound credentials
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Create a logical database; succeeds if it already exists
    async fn create_database(&self, name: &str) -> Result<()>;

    /// Drop a logical database (provisioning rollback path)
    async fn drop_database(&self, name: &str) -> Result<()>;

    /// Check role existence
    async fn has_role(&self, role: &str) -> Result<bool>;

    /// Create a role; succeeds if it already exists
    async fn create_role(&self, role: &str) -> Result<()>;

    /// Drop a role (provisioning rollback path)
    async fn drop_role(&self, role: &str) -> Result<()>;

    /// Check user existence
    async fn has_user(&self, username: &str) -> Result<bool>;

    /// Create a user with the given password
    async fn create_user(&self, username: &str, password: &str) -> Result<()>;

    /// Drop a user (provisioning rollback path)
    async fn drop_user(&self, username: &str) -> Result<()>;

    /// Replace a user password
    async fn update_password(&self, username: &str, new_password: &str) -> Result<()>;

    /// Grant a role to a user; idempotent
    async fn grant_role(&self, username: &str, role: &str) -> Result<()>;

    /// Revoke a role from a user; idempotent
    async fn revoke_role(&self, username: &str, role: &str) -> Result<()>;

    /// Grant a collection privilege to a role; idempotent
    async fn grant_privilege(&self, role: &str, collection: &str, privilege: &str) -> Result<()>;

    /// Revoke a collection privilege from a role; idempotent
    async fn revoke_privilege(&self, role: &str, collection: &str, privilege: &str) -> Result<()>;

    /// Check collection existence in the bound database
    async fn has_collection(&self, collection: &str) -> Result<bool>;

    /// Describe an existing collection, `None` when absent
    async fn describe_collection(&self, collection: &str) -> Result<Option<CollectionDescription>>;

    /// Create a collection with the fixed gateway field layout plus its
    /// dense and sparse indexes
    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()>;

    /// Drop a collection (rollback path)
    async fn drop_collection(&self, collection: &str) -> Result<()>;

    /// Upsert rows; returns the number of rows written
    ///
    /// Repeated primary keys overwrite previous rows.
    async fn upsert(&self, collection: &str, rows: Vec<VectorRow>) -> Result<u64>;

    /// Delete rows by primary key (upsert rollback path)
    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<()>;

    /// Dense ANN search; results ordered by score descending
    async fn dense_search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Sparse (BM25) search; results ordered by score descending
    async fn sparse_search(
        &self,
        collection: &str,
        query: &SparseVector,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Exact primary-key lookup
    async fn query_by_id(&self, collection: &str, id: &str) -> Result<Option<SearchHit>>;

    /// Flush buffered writes of a collection to sealed segments
    async fn flush(&self, collection: &str) -> Result<()>;

    /// Release any transport resources; further calls may fail
    ///
    /// Default is a no-op for stateless transports.
    async fn close(&self) {}
}

/// Factory producing backend clients for the connection pool
///
/// The pool keys entries by `(uri, user, database)` and calls `connect` under
/// a per-key creation lock on a miss. Secrets participate only in client
/// construction, never in the pool key.
#[async_trait]
pub trait BackendConnector: Send + Sync + 'static {
    /// Construct a client bound to `database` with the given credentials
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Connection` on transport or authentication
    /// failure; such clients are never cached.
    async fn connect(
        &self,
        uri: &str,
        user: &str,
        secret: &str,
        database: &str,
    ) -> Result<Arc<dyn VectorBackend>>;
}
