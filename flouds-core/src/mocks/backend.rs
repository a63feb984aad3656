//! Mock in-memory vector cluster
//!
//! Implements the full [`VectorBackend`] contract over process memory:
//! databases, roles, users, grants, collections with dense + sparse rows,
//! cosine/L2/IP scoring, and flush accounting. A shared [`MockCluster`] can
//! be bound by any number of per-database [`MockVectorBackend`] clients, so
//! pool and provisioning tests observe one consistent world.
//!
//! Fault injection: `fail_once("grant_role", "boom")` makes the next matching
//! call fail with an operation error, which is how transaction rollback
//! chains are exercised.

use crate::error::{GatewayError, Result};
use crate::traits::backend::{BackendConnector, VectorBackend};
use crate::types::vector::{
    CollectionDescription, CollectionSchema, DistanceMetric, SearchHit, SparseVector, VectorRow,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// One stored collection: schema plus rows keyed by primary key
#[derive(Debug, Clone)]
struct MockCollection {
    schema: CollectionSchema,
    rows: BTreeMap<String, VectorRow>,
    flush_count: u64,
}

/// Whole-cluster state shared between clients
#[derive(Debug, Default)]
struct ClusterState {
    /// database -> collection name -> collection
    databases: HashMap<String, HashMap<String, MockCollection>>,
    users: HashMap<String, String>,
    roles: HashSet<String>,
    /// username -> roles
    user_roles: HashMap<String, HashSet<String>>,
    /// (role, collection, privilege)
    privileges: HashSet<(String, String, String)>,
    /// op name -> error message, consumed on first matching call
    fail_once: HashMap<String, String>,
}

/// Shared in-memory cluster
#[derive(Debug, Default)]
pub struct MockCluster {
    state: RwLock<ClusterState>,
    reject_connections: AtomicBool,
    connect_count: AtomicUsize,
}

impl MockCluster {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Arrange for the next call of `op` to fail with an operation error
    pub async fn fail_once(&self, op: &str, message: &str) {
        self.state
            .write()
            .await
            .fail_once
            .insert(op.to_string(), message.to_string());
    }

    /// Make subsequent `connect` calls fail with a connection error
    pub fn reject_connections(&self, reject: bool) {
        self.reject_connections.store(reject, Ordering::SeqCst);
    }

    /// Number of successful client constructions (pool-miss counter)
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub async fn has_user(&self, username: &str) -> bool {
        self.state.read().await.users.contains_key(username)
    }

    pub async fn has_role(&self, role: &str) -> bool {
        self.state.read().await.roles.contains(role)
    }

    pub async fn user_has_role(&self, username: &str, role: &str) -> bool {
        self.state
            .read()
            .await
            .user_roles
            .get(username)
            .is_some_and(|roles| roles.contains(role))
    }

    pub async fn password_of(&self, username: &str) -> Option<String> {
        self.state.read().await.users.get(username).cloned()
    }

    pub async fn flush_count(&self, database: &str, collection: &str) -> u64 {
        self.state
            .read()
            .await
            .databases
            .get(database)
            .and_then(|db| db.get(collection))
            .map_or(0, |c| c.flush_count)
    }

    pub async fn row_count(&self, database: &str, collection: &str) -> usize {
        self.state
            .read()
            .await
            .databases
            .get(database)
            .and_then(|db| db.get(collection))
            .map_or(0, |c| c.rows.len())
    }

    async fn take_failure(&self, op: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(message) = state.fail_once.remove(op) {
            return Err(GatewayError::operation(message));
        }
        Ok(())
    }
}

/// Mock client bound to one database of a shared cluster
#[derive(Debug, Clone)]
pub struct MockVectorBackend {
    cluster: Arc<MockCluster>,
    database: String,
}

impl MockVectorBackend {
    #[must_use]
    pub fn new(cluster: Arc<MockCluster>, database: impl Into<String>) -> Self {
        Self {
            cluster,
            database: database.into(),
        }
    }

    fn dense_score(metric: DistanceMetric, query: &[f32], doc: &[f32]) -> f32 {
        match metric {
            DistanceMetric::Cosine => {
                let dot: f32 = query.iter().zip(doc).map(|(a, b)| a * b).sum();
                let qn: f32 = query.iter().map(|a| a * a).sum::<f32>().sqrt();
                let dn: f32 = doc.iter().map(|a| a * a).sum::<f32>().sqrt();
                if qn == 0.0 || dn == 0.0 {
                    0.0
                } else {
                    dot / (qn * dn)
                }
            }
            DistanceMetric::Ip => query.iter().zip(doc).map(|(a, b)| a * b).sum(),
            // Folded into a similarity so that "score >= threshold" keeps
            // the same orientation across metrics.
            DistanceMetric::L2 => {
                let dist: f32 = query
                    .iter()
                    .zip(doc)
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f32>()
                    .sqrt();
                1.0 / (1.0 + dist)
            }
        }
    }
}

#[async_trait]
impl VectorBackend for MockVectorBackend {
    async fn ping(&self) -> Result<()> {
        if self.cluster.reject_connections.load(Ordering::SeqCst) {
            return Err(GatewayError::connection("mock cluster unreachable"));
        }
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let state = self.cluster.state.read().await;
        Ok(state.databases.keys().cloned().collect())
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        self.cluster.take_failure("create_database").await?;
        let mut state = self.cluster.state.write().await;
        state.databases.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        let mut state = self.cluster.state.write().await;
        state.databases.remove(name);
        Ok(())
    }

    async fn has_role(&self, role: &str) -> Result<bool> {
        Ok(self.cluster.state.read().await.roles.contains(role))
    }

    async fn create_role(&self, role: &str) -> Result<()> {
        self.cluster.take_failure("create_role").await?;
        self.cluster.state.write().await.roles.insert(role.to_string());
        Ok(())
    }

    async fn drop_role(&self, role: &str) -> Result<()> {
        let mut state = self.cluster.state.write().await;
        state.roles.remove(role);
        state
            .privileges
            .retain(|(granted_role, _, _)| granted_role.as_str() != role);
        Ok(())
    }

    async fn has_user(&self, username: &str) -> Result<bool> {
        Ok(self.cluster.state.read().await.users.contains_key(username))
    }

    async fn create_user(&self, username: &str, password: &str) -> Result<()> {
        self.cluster.take_failure("create_user").await?;
        self.cluster
            .state
            .write()
            .await
            .users
            .insert(username.to_string(), password.to_string());
        Ok(())
    }

    async fn drop_user(&self, username: &str) -> Result<()> {
        let mut state = self.cluster.state.write().await;
        state.users.remove(username);
        state.user_roles.remove(username);
        Ok(())
    }

    async fn update_password(&self, username: &str, new_password: &str) -> Result<()> {
        self.cluster.take_failure("update_password").await?;
        let mut state = self.cluster.state.write().await;
        match state.users.get_mut(username) {
            Some(stored) => {
                *stored = new_password.to_string();
                Ok(())
            }
            None => Err(GatewayError::operation(format!(
                "user {username} does not exist"
            ))),
        }
    }

    async fn grant_role(&self, username: &str, role: &str) -> Result<()> {
        self.cluster.take_failure("grant_role").await?;
        let mut state = self.cluster.state.write().await;
        if !state.users.contains_key(username) {
            return Err(GatewayError::operation(format!(
                "user {username} does not exist"
            )));
        }
        state
            .user_roles
            .entry(username.to_string())
            .or_default()
            .insert(role.to_string());
        Ok(())
    }

    async fn revoke_role(&self, username: &str, role: &str) -> Result<()> {
        let mut state = self.cluster.state.write().await;
        if let Some(roles) = state.user_roles.get_mut(username) {
            roles.remove(role);
        }
        Ok(())
    }

    async fn grant_privilege(&self, role: &str, collection: &str, privilege: &str) -> Result<()> {
        self.cluster.take_failure("grant_privilege").await?;
        self.cluster.state.write().await.privileges.insert((
            role.to_string(),
            collection.to_string(),
            privilege.to_string(),
        ));
        Ok(())
    }

    async fn revoke_privilege(&self, role: &str, collection: &str, privilege: &str) -> Result<()> {
        self.cluster.state.write().await.privileges.remove(&(
            role.to_string(),
            collection.to_string(),
            privilege.to_string(),
        ));
        Ok(())
    }

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        let state = self.cluster.state.read().await;
        Ok(state
            .databases
            .get(&self.database)
            .is_some_and(|db| db.contains_key(collection)))
    }

    async fn describe_collection(&self, collection: &str) -> Result<Option<CollectionDescription>> {
        let state = self.cluster.state.read().await;
        Ok(state
            .databases
            .get(&self.database)
            .and_then(|db| db.get(collection))
            .map(|c| CollectionDescription {
                name: c.schema.name.clone(),
                dimension: c.schema.dimension,
            }))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        self.cluster.take_failure("create_collection").await?;
        let mut state = self.cluster.state.write().await;
        let db = state
            .databases
            .entry(self.database.clone())
            .or_default();
        if db.contains_key(&schema.name) {
            return Err(GatewayError::operation(format!(
                "collection {} already exists",
                schema.name
            )));
        }
        db.insert(
            schema.name.clone(),
            MockCollection {
                schema: schema.clone(),
                rows: BTreeMap::new(),
                flush_count: 0,
            },
        );
        Ok(())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let mut state = self.cluster.state.write().await;
        if let Some(db) = state.databases.get_mut(&self.database) {
            db.remove(collection);
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, rows: Vec<VectorRow>) -> Result<u64> {
        self.cluster.take_failure("upsert").await?;
        let mut state = self.cluster.state.write().await;
        let coll = state
            .databases
            .get_mut(&self.database)
            .and_then(|db| db.get_mut(collection))
            .ok_or_else(|| {
                GatewayError::operation(format!("collection {collection} not found"))
            })?;
        for row in &rows {
            if row.dense.len() != coll.schema.dimension {
                return Err(GatewayError::operation(format!(
                    "vector dimension {} does not match collection dimension {}",
                    row.dense.len(),
                    coll.schema.dimension
                )));
            }
        }
        let written = rows.len() as u64;
        for row in rows {
            coll.rows.insert(row.id.clone(), row);
        }
        Ok(written)
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<()> {
        self.cluster.take_failure("delete_by_ids").await?;
        let mut state = self.cluster.state.write().await;
        if let Some(coll) = state
            .databases
            .get_mut(&self.database)
            .and_then(|db| db.get_mut(collection))
        {
            for id in ids {
                coll.rows.remove(id);
            }
        }
        Ok(())
    }

    async fn dense_search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.cluster.take_failure("dense_search").await?;
        let state = self.cluster.state.read().await;
        let coll = state
            .databases
            .get(&self.database)
            .and_then(|db| db.get(collection))
            .ok_or_else(|| {
                GatewayError::operation(format!("collection {collection} not found"))
            })?;
        let mut hits: Vec<SearchHit> = coll
            .rows
            .values()
            .map(|row| SearchHit {
                id: row.id.clone(),
                score: Self::dense_score(coll.schema.metric, vector, &row.dense),
                chunk: row.chunk.clone(),
                metadata: row.meta.clone(),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn sparse_search(
        &self,
        collection: &str,
        query: &SparseVector,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.cluster.take_failure("sparse_search").await?;
        let state = self.cluster.state.read().await;
        let coll = state
            .databases
            .get(&self.database)
            .and_then(|db| db.get(collection))
            .ok_or_else(|| {
                GatewayError::operation(format!("collection {collection} not found"))
            })?;
        let mut hits: Vec<SearchHit> = coll
            .rows
            .values()
            .filter_map(|row| {
                let score = query.dot(&row.sparse);
                (score > 0.0).then(|| SearchHit {
                    id: row.id.clone(),
                    score,
                    chunk: row.chunk.clone(),
                    metadata: row.meta.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    async fn query_by_id(&self, collection: &str, id: &str) -> Result<Option<SearchHit>> {
        let state = self.cluster.state.read().await;
        Ok(state
            .databases
            .get(&self.database)
            .and_then(|db| db.get(collection))
            .and_then(|coll| coll.rows.get(id))
            .map(|row| SearchHit {
                id: row.id.clone(),
                score: 1.0,
                chunk: row.chunk.clone(),
                metadata: row.meta.clone(),
            }))
    }

    async fn flush(&self, collection: &str) -> Result<()> {
        self.cluster.take_failure("flush").await?;
        let mut state = self.cluster.state.write().await;
        if let Some(coll) = state
            .databases
            .get_mut(&self.database)
            .and_then(|db| db.get_mut(collection))
        {
            coll.flush_count += 1;
        }
        Ok(())
    }
}

/// Connector handing out mock clients bound to a shared cluster
#[derive(Debug, Clone)]
pub struct MockBackendConnector {
    cluster: Arc<MockCluster>,
}

impl MockBackendConnector {
    #[must_use]
    pub fn new(cluster: Arc<MockCluster>) -> Self {
        Self { cluster }
    }

    #[must_use]
    pub fn cluster(&self) -> Arc<MockCluster> {
        self.cluster.clone()
    }
}

#[async_trait]
impl BackendConnector for MockBackendConnector {
    async fn connect(
        &self,
        _uri: &str,
        _user: &str,
        _secret: &str,
        database: &str,
    ) -> Result<Arc<dyn VectorBackend>> {
        if self.cluster.reject_connections.load(Ordering::SeqCst) {
            return Err(GatewayError::connection("mock cluster unreachable"));
        }
        self.cluster.connect_count.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockVectorBackend::new(
            self.cluster.clone(),
            database,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::types::vector::IndexKind;

    fn schema(name: &str, dimension: usize, metric: DistanceMetric) -> CollectionSchema {
        CollectionSchema {
            name: name.to_string(),
            dimension,
            metric,
            index: IndexKind::IvfFlat,
            nlist: 256,
            metadata_length: 4096,
            drop_ratio_build: 0.2,
        }
    }

    fn row(id: &str, dense: Vec<f32>, sparse_dims: &[(u32, f32)]) -> VectorRow {
        let mut sparse = SparseVector::new();
        for (dim, w) in sparse_dims {
            sparse.set(*dim, *w);
        }
        VectorRow {
            id: id.to_string(),
            dense,
            sparse,
            chunk: format!("chunk {id}"),
            model: "m1".to_string(),
            meta: json!({}),
        }
    }

    #[tokio::test]
    async fn test_upsert_overwrites_on_same_key() {
        let cluster = MockCluster::new();
        let backend = MockVectorBackend::new(cluster.clone(), "db1");
        backend.create_database("db1").await.unwrap();
        backend
            .create_collection(&schema("c1", 2, DistanceMetric::Cosine))
            .await
            .unwrap();

        backend
            .upsert("c1", vec![row("a", vec![1.0, 0.0], &[])])
            .await
            .unwrap();
        let mut replacement = row("a", vec![0.0, 1.0], &[]);
        replacement.chunk = "replaced".to_string();
        backend.upsert("c1", vec![replacement]).await.unwrap();

        assert_eq!(cluster.row_count("db1", "c1").await, 1);
        let hit = backend.query_by_id("c1", "a").await.unwrap().unwrap();
        assert_eq!(hit.chunk, "replaced");
    }

    #[tokio::test]
    async fn test_dense_search_orders_by_similarity() {
        let cluster = MockCluster::new();
        let backend = MockVectorBackend::new(cluster, "db1");
        backend.create_database("db1").await.unwrap();
        backend
            .create_collection(&schema("c1", 4, DistanceMetric::Cosine))
            .await
            .unwrap();
        backend
            .upsert(
                "c1",
                vec![
                    row("a", vec![1.0, 0.0, 0.0, 0.0], &[]),
                    row("b", vec![0.0, 1.0, 0.0, 0.0], &[]),
                ],
            )
            .await
            .unwrap();

        let hits = backend
            .dense_search("c1", &[0.9, 0.1, 0.0, 0.0], 2)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[1].id, "b");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_sparse_search_skips_zero_overlap() {
        let cluster = MockCluster::new();
        let backend = MockVectorBackend::new(cluster, "db1");
        backend.create_database("db1").await.unwrap();
        backend
            .create_collection(&schema("c1", 2, DistanceMetric::Cosine))
            .await
            .unwrap();
        backend
            .upsert(
                "c1",
                vec![
                    row("a", vec![1.0, 0.0], &[(10, 1.2)]),
                    row("b", vec![0.0, 1.0], &[(20, 0.8)]),
                ],
            )
            .await
            .unwrap();

        let mut query = SparseVector::new();
        query.set(20, 1.0);
        let hits = backend.sparse_search("c1", &query, 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[tokio::test]
    async fn test_fail_once_consumed_by_next_call() {
        let cluster = MockCluster::new();
        let backend = MockVectorBackend::new(cluster.clone(), "db1");
        backend.create_user("u1", "pw").await.unwrap();
        cluster.fail_once("grant_role", "grant exploded").await;

        let err = backend.grant_role("u1", "r1").await.unwrap_err();
        assert!(err.to_string().contains("grant exploded"));
        // Second call succeeds, the injected failure is gone
        backend.grant_role("u1", "r1").await.unwrap();
        assert!(cluster.user_has_role("u1", "r1").await);
    }

    #[tokio::test]
    async fn test_upsert_rejects_dimension_mismatch() {
        let cluster = MockCluster::new();
        let backend = MockVectorBackend::new(cluster, "db1");
        backend.create_database("db1").await.unwrap();
        backend
            .create_collection(&schema("c1", 4, DistanceMetric::Cosine))
            .await
            .unwrap();
        let err = backend
            .upsert("c1", vec![row("a", vec![1.0, 0.0], &[])])
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Operation { .. }));
    }
}
