//! Milvus RESTful v2 backend client
//!
//! Implements the [`VectorBackend`] contract over the `/v2/vectordb` HTTP
//! API. Every client is bound to one `(uri, user, database)` and carries its
//! credentials as a bearer token of the form `user:secret`, matching the
//! pool keying scheme. Transport failures map to connection errors and are
//! retried by the caller's policy, not here; API-level rejections map to
//! operation errors with the server message passed through (sanitisation
//! happens at the response boundary).

use async_trait::async_trait;
use flouds_core::error::{GatewayError, Result};
use flouds_core::traits::backend::{BackendConnector, VectorBackend};
use flouds_core::types::vector::{
    fields, CollectionDescription, CollectionSchema, SearchHit, SparseVector, VectorRow,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

const API_PREFIX: &str = "/v2/vectordb";

/// HTTP client for one Milvus database
pub struct MilvusHttpBackend {
    http: reqwest::Client,
    base_url: String,
    token: String,
    database: String,
}

impl std::fmt::Debug for MilvusHttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MilvusHttpBackend")
            .field("base_url", &self.base_url)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl MilvusHttpBackend {
    /// Build a client bound to `database` on `uri`
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Connection` when the HTTP client cannot be
    /// constructed.
    pub fn new(
        uri: &str,
        user: &str,
        secret: &str,
        database: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::connection(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: uri.trim_end_matches('/').to_string(),
            token: format!("{user}:{secret}"),
            database: database.to_string(),
        })
    }

    /// POST an API call and unwrap the `{code, message, data}` envelope
    async fn post(&self, path: &str, mut body: Map<String, Value>) -> Result<Value> {
        body.entry("dbName".to_string())
            .or_insert_with(|| Value::String(self.database.clone()));
        let url = format!("{}{API_PREFIX}{path}", self.base_url);
        trace!(%url, "Milvus API call");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&Value::Object(body))
            .send()
            .await
            .map_err(|e| GatewayError::connection(format!("vector engine unreachable: {e}")))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| GatewayError::connection(format!("malformed engine response: {e}")))?;

        if !status.is_success() {
            return Err(GatewayError::operation(format!(
                "engine rejected {path} with status {status}"
            )));
        }
        let code = payload.get("code").and_then(Value::as_i64).unwrap_or(0);
        if code != 0 {
            let message = payload
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unspecified engine error");
            return Err(GatewayError::operation(format!(
                "engine error {code} on {path}: {message}"
            )));
        }
        Ok(payload.get("data").cloned().unwrap_or(Value::Null))
    }

    fn sparse_to_json(sparse: &SparseVector) -> Value {
        Value::Object(
            sparse
                .0
                .iter()
                .map(|(dim, weight)| (dim.to_string(), json!(weight)))
                .collect(),
        )
    }

    #[allow(clippy::cast_possible_truncation)]
    fn parse_hits(data: &Value) -> Vec<SearchHit> {
        let rows = match data {
            Value::Array(rows) => rows.as_slice(),
            _ => &[],
        };
        rows.iter()
            .filter_map(|row| {
                let id = row
                    .get(fields::ID)
                    .or_else(|| row.get("id"))
                    .and_then(Value::as_str)?
                    .to_string();
                let score = row
                    .get("distance")
                    .or_else(|| row.get("score"))
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                Some(SearchHit {
                    id,
                    score: score as f32,
                    chunk: row
                        .get(fields::CHUNK)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    metadata: row.get(fields::META).cloned().unwrap_or(Value::Null),
                })
            })
            .collect()
    }

    fn id_filter(ids: &[String]) -> String {
        let quoted: Vec<String> = ids.iter().map(|id| format!("\"{id}\"")).collect();
        format!("{} in [{}]", fields::ID, quoted.join(", "))
    }
}

#[async_trait]
impl VectorBackend for MilvusHttpBackend {
    async fn ping(&self) -> Result<()> {
        self.post("/collections/list", Map::new()).await.map(|_| ())
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let data = self.post("/databases/list", Map::new()).await?;
        Ok(data
            .as_array()
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_database(&self, name: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("dbName".to_string(), json!(name));
        match self.post("/databases/create", body).await {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("already exist") => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn drop_database(&self, name: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("dbName".to_string(), json!(name));
        self.post("/databases/drop", body).await.map(|_| ())
    }

    async fn has_role(&self, role: &str) -> Result<bool> {
        let data = self.post("/roles/list", Map::new()).await?;
        Ok(data
            .as_array()
            .is_some_and(|roles| roles.iter().filter_map(Value::as_str).any(|r| r == role)))
    }

    async fn create_role(&self, role: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("roleName".to_string(), json!(role));
        match self.post("/roles/create", body).await {
            Ok(_) => Ok(()),
            Err(err) if err.to_string().contains("already exist") => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn drop_role(&self, role: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("roleName".to_string(), json!(role));
        self.post("/roles/drop", body).await.map(|_| ())
    }

    async fn has_user(&self, username: &str) -> Result<bool> {
        let data = self.post("/users/list", Map::new()).await?;
        Ok(data
            .as_array()
            .is_some_and(|users| users.iter().filter_map(Value::as_str).any(|u| u == username)))
    }

    async fn create_user(&self, username: &str, password: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("userName".to_string(), json!(username));
        body.insert("password".to_string(), json!(password));
        self.post("/users/create", body).await.map(|_| ())
    }

    async fn drop_user(&self, username: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("userName".to_string(), json!(username));
        self.post("/users/drop", body).await.map(|_| ())
    }

    async fn update_password(&self, username: &str, new_password: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("userName".to_string(), json!(username));
        body.insert("newPassword".to_string(), json!(new_password));
        self.post("/users/update_password", body).await.map(|_| ())
    }

    async fn grant_role(&self, username: &str, role: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("userName".to_string(), json!(username));
        body.insert("roleName".to_string(), json!(role));
        self.post("/users/grant_role", body).await.map(|_| ())
    }

    async fn revoke_role(&self, username: &str, role: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("userName".to_string(), json!(username));
        body.insert("roleName".to_string(), json!(role));
        self.post("/users/revoke_role", body).await.map(|_| ())
    }

    async fn grant_privilege(&self, role: &str, collection: &str, privilege: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("roleName".to_string(), json!(role));
        body.insert("objectType".to_string(), json!("Collection"));
        body.insert("objectName".to_string(), json!(collection));
        body.insert("privilege".to_string(), json!(privilege));
        self.post("/roles/grant_privilege", body).await.map(|_| ())
    }

    async fn revoke_privilege(&self, role: &str, collection: &str, privilege: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("roleName".to_string(), json!(role));
        body.insert("objectType".to_string(), json!("Collection"));
        body.insert("objectName".to_string(), json!(collection));
        body.insert("privilege".to_string(), json!(privilege));
        self.post("/roles/revoke_privilege", body).await.map(|_| ())
    }

    async fn has_collection(&self, collection: &str) -> Result<bool> {
        let mut body = Map::new();
        body.insert("collectionName".to_string(), json!(collection));
        let data = self.post("/collections/has", body).await?;
        Ok(data.get("has").and_then(Value::as_bool).unwrap_or(false))
    }

    async fn describe_collection(&self, collection: &str) -> Result<Option<CollectionDescription>> {
        if !self.has_collection(collection).await? {
            return Ok(None);
        }
        let mut body = Map::new();
        body.insert("collectionName".to_string(), json!(collection));
        let data = self.post("/collections/describe", body).await?;

        // Dimension lives on the dense field's params
        let dimension = data
            .get("fields")
            .and_then(Value::as_array)
            .and_then(|field_list| {
                field_list.iter().find(|field| {
                    field.get("name").and_then(Value::as_str) == Some(fields::DENSE)
                })
            })
            .and_then(|field| field.get("params"))
            .and_then(|params| params.get("dim"))
            .and_then(|dim| {
                dim.as_u64()
                    .or_else(|| dim.as_str().and_then(|s| s.parse().ok()))
            })
            .unwrap_or(0);

        Ok(Some(CollectionDescription {
            name: collection.to_string(),
            dimension: usize::try_from(dimension).unwrap_or(0),
        }))
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<()> {
        let mut body = Map::new();
        body.insert("collectionName".to_string(), json!(schema.name));
        body.insert(
            "schema".to_string(),
            json!({
                "autoId": false,
                "enableDynamicField": false,
                "fields": [
                    {
                        "fieldName": fields::ID,
                        "dataType": "VarChar",
                        "isPrimary": true,
                        "elementTypeParams": {"max_length": "512"}
                    },
                    {
                        "fieldName": fields::DENSE,
                        "dataType": "FloatVector",
                        "elementTypeParams": {"dim": schema.dimension.to_string()}
                    },
                    {
                        "fieldName": fields::SPARSE,
                        "dataType": "SparseFloatVector"
                    },
                    {
                        "fieldName": fields::CHUNK,
                        "dataType": "VarChar",
                        "elementTypeParams": {"max_length": schema.metadata_length.to_string()}
                    },
                    {
                        "fieldName": fields::MODEL,
                        "dataType": "VarChar",
                        "elementTypeParams": {"max_length": "256"}
                    },
                    {
                        "fieldName": fields::META,
                        "dataType": "JSON"
                    }
                ]
            }),
        );
        body.insert(
            "indexParams".to_string(),
            json!([
                {
                    "fieldName": fields::DENSE,
                    "indexName": format!("{}_idx", fields::DENSE),
                    "metricType": schema.metric.as_str(),
                    "indexType": schema.index.as_str(),
                    "params": {"nlist": schema.nlist}
                },
                {
                    "fieldName": fields::SPARSE,
                    "indexName": format!("{}_idx", fields::SPARSE),
                    "metricType": "IP",
                    "indexType": "SPARSE_INVERTED_INDEX",
                    "params": {"drop_ratio_build": schema.drop_ratio_build}
                }
            ]),
        );
        debug!(collection = %schema.name, dimension = schema.dimension, "Creating collection");
        self.post("/collections/create", body).await.map(|_| ())
    }

    async fn drop_collection(&self, collection: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("collectionName".to_string(), json!(collection));
        self.post("/collections/drop", body).await.map(|_| ())
    }

    async fn upsert(&self, collection: &str, rows: Vec<VectorRow>) -> Result<u64> {
        let count = rows.len() as u64;
        let data: Vec<Value> = rows
            .into_iter()
            .map(|row| {
                json!({
                    fields::ID: row.id,
                    fields::DENSE: row.dense,
                    fields::SPARSE: Self::sparse_to_json(&row.sparse),
                    fields::CHUNK: row.chunk,
                    fields::MODEL: row.model,
                    fields::META: row.meta,
                })
            })
            .collect();
        let mut body = Map::new();
        body.insert("collectionName".to_string(), json!(collection));
        body.insert("data".to_string(), Value::Array(data));
        let result = self.post("/entities/upsert", body).await?;
        Ok(result
            .get("upsertCount")
            .and_then(Value::as_u64)
            .unwrap_or(count))
    }

    async fn delete_by_ids(&self, collection: &str, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut body = Map::new();
        body.insert("collectionName".to_string(), json!(collection));
        body.insert("filter".to_string(), json!(Self::id_filter(ids)));
        self.post("/entities/delete", body).await.map(|_| ())
    }

    async fn dense_search(
        &self,
        collection: &str,
        vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut body = Map::new();
        body.insert("collectionName".to_string(), json!(collection));
        body.insert("data".to_string(), json!([vector]));
        body.insert("annsField".to_string(), json!(fields::DENSE));
        body.insert("limit".to_string(), json!(limit));
        body.insert(
            "outputFields".to_string(),
            json!([fields::ID, fields::CHUNK, fields::META]),
        );
        let data = self.post("/entities/search", body).await?;
        Ok(Self::parse_hits(&data))
    }

    async fn sparse_search(
        &self,
        collection: &str,
        query: &SparseVector,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut body = Map::new();
        body.insert("collectionName".to_string(), json!(collection));
        body.insert("data".to_string(), json!([Self::sparse_to_json(query)]));
        body.insert("annsField".to_string(), json!(fields::SPARSE));
        body.insert("limit".to_string(), json!(limit));
        body.insert(
            "outputFields".to_string(),
            json!([fields::ID, fields::CHUNK, fields::META]),
        );
        let data = self.post("/entities/search", body).await?;
        Ok(Self::parse_hits(&data))
    }

    async fn query_by_id(&self, collection: &str, id: &str) -> Result<Option<SearchHit>> {
        let mut body = Map::new();
        body.insert("collectionName".to_string(), json!(collection));
        body.insert(
            "filter".to_string(),
            json!(Self::id_filter(std::slice::from_ref(&id.to_string()))),
        );
        body.insert(
            "outputFields".to_string(),
            json!([fields::ID, fields::CHUNK, fields::META]),
        );
        let data = self.post("/entities/query", body).await?;
        Ok(Self::parse_hits(&data).into_iter().next())
    }

    async fn flush(&self, collection: &str) -> Result<()> {
        let mut body = Map::new();
        body.insert("collectionName".to_string(), json!(collection));
        self.post("/collections/flush", body).await.map(|_| ())
    }
}

/// Connector building Milvus HTTP clients for the pool
///
/// Clients bound to the admin database get the longer provisioning
/// deadline; data-plane clients get the request deadline.
#[derive(Debug, Clone)]
pub struct MilvusConnector {
    request_timeout: Duration,
    admin_timeout: Duration,
    admin_database: String,
}

impl MilvusConnector {
    #[must_use]
    pub const fn new(
        request_timeout: Duration,
        admin_timeout: Duration,
        admin_database: String,
    ) -> Self {
        Self {
            request_timeout,
            admin_timeout,
            admin_database,
        }
    }
}

#[async_trait]
impl BackendConnector for MilvusConnector {
    async fn connect(
        &self,
        uri: &str,
        user: &str,
        secret: &str,
        database: &str,
    ) -> Result<Arc<dyn VectorBackend>> {
        let timeout = if database == self.admin_database {
            self.admin_timeout
        } else {
            self.request_timeout
        };
        let backend = MilvusHttpBackend::new(uri, user, secret, database, timeout)?;
        // Probe once so broken credentials or endpoints never enter the pool
        backend.ping().await?;
        Ok(Arc::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_serialisation_shape() {
        let mut sparse = SparseVector::new();
        sparse.set(7, 0.5);
        sparse.set(1, 1.25);
        let value = MilvusHttpBackend::sparse_to_json(&sparse);
        assert_eq!(value, json!({"1": 1.25, "7": 0.5}));
    }

    #[test]
    fn test_id_filter_quoting() {
        let filter = MilvusHttpBackend::id_filter(&["a".to_string(), "b-2".to_string()]);
        assert_eq!(filter, "flouds_vector_id in [\"a\", \"b-2\"]");
    }

    #[test]
    fn test_parse_hits_tolerates_shapes() {
        let data = json!([
            {"flouds_vector_id": "a", "distance": 0.9, "chunk": "text", "meta": {"k": 1}},
            {"id": "b", "score": 0.5, "chunk": "other"},
            {"distance": 0.1}
        ]);
        let hits = MilvusHttpBackend::parse_hits(&data);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert!((hits[0].score - 0.9).abs() < 1e-6);
        assert_eq!(hits[1].id, "b");
        assert_eq!(hits[1].metadata, Value::Null);
    }

    #[tokio::test]
    async fn test_unreachable_engine_is_connection_error() {
        let backend = MilvusHttpBackend::new(
            "http://127.0.0.1:1",
            "root",
            "pw",
            "default",
            Duration::from_millis(200),
        )
        .unwrap();
        let err = backend.ping().await.unwrap_err();
        assert!(matches!(err, GatewayError::Connection { .. }));
    }
}
