//! Collection schema generation
//!
//! Creates the per-`(tenant, model)` collection with the fixed field layout,
//! its dense and sparse indexes, and the tenant-role grants. Generation is
//! idempotent: an existing collection with a matching dimension is a no-op,
//! a differing dimension is a schema conflict. Concurrent generations for
//! the same `(tenant, model)` are serialised by an in-process mutex so the
//! second caller fails fast instead of racing the backend.

use dashmap::DashMap;
use flouds_core::error::{GatewayError, Result};
use flouds_core::traits::backend::{VectorBackend, COLLECTION_PRIVILEGES};
use flouds_core::types::tenant::TenantCode;
use flouds_core::types::vector::{
    validate_dimension, CollectionSchema, DistanceMetric, IndexKind,
};
use flouds_storage::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Parameters accepted by schema generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaRequest {
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub index: IndexKind,
    pub nlist: u32,
    pub metadata_length: u32,
    pub drop_ratio_build: f32,
}

/// Result summary returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaOutcome {
    pub collection_name: String,
    pub created: bool,
    pub index_created: bool,
    pub permissions_granted: bool,
}

/// Idempotent, conflict-checked schema generator
pub struct SchemaManager {
    /// Per-(tenant, model) generation locks
    locks: DashMap<(String, String), Arc<tokio::sync::Mutex<()>>>,
}

impl std::fmt::Debug for SchemaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaManager")
            .field("locks", &self.locks.len())
            .finish()
    }
}

impl Default for SchemaManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Ensure the collection for `(tenant, model)` exists with `request`'s shape
    ///
    /// # Errors
    ///
    /// - `GatewayError::Validation` for an out-of-range dimension
    /// - `GatewayError::SchemaConflict` when the collection exists with a
    ///   different dimension
    /// - backend errors from creation or grants (changes roll back)
    pub async fn generate_schema(
        &self,
        client: Arc<dyn VectorBackend>,
        tenant: &TenantCode,
        model: &str,
        request: &SchemaRequest,
    ) -> Result<SchemaOutcome> {
        validate_dimension(request.dimension)?;
        if model.is_empty() {
            return Err(GatewayError::validation("model_name must not be empty"));
        }

        let collection_name = tenant.collection_name(model);
        let lock = self
            .locks
            .entry((tenant.as_str().to_string(), model.to_string()))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _generating = lock.lock().await;

        if let Some(existing) = client.describe_collection(&collection_name).await? {
            if existing.dimension != request.dimension {
                return Err(GatewayError::schema_conflict(format!(
                    "collection {collection_name} exists with dimension {}, requested {}",
                    existing.dimension, request.dimension
                )));
            }
            debug!(collection = %collection_name, "Schema already present, no-op");
            return Ok(SchemaOutcome {
                collection_name,
                created: false,
                index_created: false,
                permissions_granted: false,
            });
        }

        let schema = CollectionSchema {
            name: collection_name.clone(),
            dimension: request.dimension,
            metric: request.metric,
            index: request.index,
            nlist: request.nlist,
            metadata_length: request.metadata_length,
            drop_ratio_build: request.drop_ratio_build,
        };
        let role = tenant.role_name();

        let mut txn = Transaction::begin(format!("generate_schema:{collection_name}"));
        {
            let client = client.clone();
            let schema = schema.clone();
            let rollback_client = client.clone();
            let rollback_name = collection_name.clone();
            txn.add(
                "create_collection",
                move || async move {
                    client.create_collection(&schema).await?;
                    Ok(json!(schema.name))
                },
                move |_| async move { rollback_client.drop_collection(&rollback_name).await },
            );
        }
        for privilege in COLLECTION_PRIVILEGES {
            let grant_client = client.clone();
            let revoke_client = client.clone();
            let grant_role = role.clone();
            let revoke_role = role.clone();
            let grant_coll = collection_name.clone();
            let revoke_coll = collection_name.clone();
            txn.add(
                format!("grant:{privilege}"),
                move || async move {
                    grant_client
                        .grant_privilege(&grant_role, &grant_coll, privilege)
                        .await?;
                    Ok(json!(privilege))
                },
                move |_| async move {
                    revoke_client
                        .revoke_privilege(&revoke_role, &revoke_coll, privilege)
                        .await
                },
            );
        }
        txn.execute().await?;

        info!(collection = %collection_name, dimension = request.dimension, "Schema created");
        Ok(SchemaOutcome {
            collection_name,
            created: true,
            index_created: true,
            permissions_granted: true,
        })
    }
}
