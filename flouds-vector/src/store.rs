//! Insert, search and flush over tenant collections
//!
//! The engine is stateless per request: every call receives the pooled
//! backend client bound to the tenant database. Inserts compose upsert and
//! flush through the transaction manager; search runs dense-only or hybrid
//! (dense + BM25 sparse fused with Reciprocal Rank Fusion).

use crate::bm25::{tokenize, Bm25SparseEncoder};
use flouds_core::error::{GatewayError, Result};
use flouds_core::traits::backend::VectorBackend;
use flouds_core::types::tenant::TenantCode;
use flouds_core::types::vector::{EmbeddedVector, SearchHit, VectorRow, MAX_VECTOR_ID_LEN};
use flouds_storage::Transaction;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// RRF constant; standard value from the literature
const RRF_K: f32 = 60.0;

/// Search parameters after DTO validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    pub limit: usize,
    pub score_threshold: Option<f32>,
    pub hybrid: bool,
    pub text_filter: Option<String>,
    pub minimum_words_match: usize,
    pub include_stop_words: bool,
}

/// Insert result summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub inserted: u64,
    pub flushed: bool,
}

/// Data-plane engine over tenant collections
#[derive(Debug)]
pub struct VectorStoreEngine {
    encoder: Bm25SparseEncoder,
    auto_flush_min_batch: usize,
}

impl VectorStoreEngine {
    #[must_use]
    pub fn new(auto_flush_min_batch: usize) -> Self {
        Self {
            encoder: Bm25SparseEncoder::default(),
            auto_flush_min_batch,
        }
    }

    /// Upsert a batch of embedded vectors into the tenant+model collection
    ///
    /// Validation: the collection must exist, every vector must match its
    /// dimension, chunks must be non-empty, and keys must fit the VARCHAR
    /// primary key. Duplicate keys within the batch collapse to the last
    /// occurrence. The upsert and the optional flush run as one transaction;
    /// rolling back an upsert deletes the written keys, flush is not undone.
    ///
    /// # Errors
    ///
    /// `GatewayError::Validation` for batch shape problems,
    /// `GatewayError::Operation` when the collection is missing or the
    /// backend rejects the write.
    pub async fn insert(
        &self,
        client: Arc<dyn VectorBackend>,
        tenant: &TenantCode,
        model: &str,
        data: Vec<EmbeddedVector>,
        auto_flush: Option<bool>,
    ) -> Result<InsertOutcome> {
        if data.is_empty() {
            return Err(GatewayError::validation("insert batch must not be empty"));
        }
        let collection = tenant.collection_name(model);
        let description = client
            .describe_collection(&collection)
            .await?
            .ok_or_else(|| {
                GatewayError::operation(format!(
                    "collection {collection} does not exist; generate the schema first"
                ))
            })?;

        // Last write wins for duplicate keys within the batch
        let mut dedup: HashMap<String, usize> = HashMap::new();
        for (idx, item) in data.iter().enumerate() {
            if item.key.is_empty() || item.key.len() > MAX_VECTOR_ID_LEN {
                return Err(GatewayError::validation(format!(
                    "vector key must be 1..={MAX_VECTOR_ID_LEN} characters"
                )));
            }
            if item.chunk.is_empty() {
                return Err(GatewayError::validation(format!(
                    "chunk for key '{}' must not be empty",
                    item.key
                )));
            }
            if item.vector.len() != description.dimension {
                return Err(GatewayError::validation(format!(
                    "vector for key '{}' has dimension {}, collection expects {}",
                    item.key,
                    item.vector.len(),
                    description.dimension
                )));
            }
            dedup.insert(item.key.clone(), idx);
        }

        let mut keep: Vec<bool> = vec![false; data.len()];
        for idx in dedup.values() {
            keep[*idx] = true;
        }
        let rows: Vec<VectorRow> = data
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| keep[*idx])
            .map(|(_, item)| VectorRow {
                id: item.key,
                sparse: self.encoder.encode_document(&item.chunk),
                dense: item.vector,
                model: item.model.unwrap_or_else(|| model.to_string()),
                meta: Value::Object(item.metadata),
                chunk: item.chunk,
            })
            .collect();

        let batch_size = rows.len();
        let flush_wanted = auto_flush.unwrap_or(batch_size >= self.auto_flush_min_batch);
        let keys: Vec<String> = rows.iter().map(|row| row.id.clone()).collect();

        let mut txn = Transaction::begin(format!("insert:{collection}"));
        {
            let upsert_client = client.clone();
            let rollback_client = client.clone();
            let upsert_coll = collection.clone();
            let rollback_coll = collection.clone();
            txn.add(
                "upsert",
                move || async move {
                    let written = upsert_client.upsert(&upsert_coll, rows).await?;
                    Ok(json!(written))
                },
                move |_| async move { rollback_client.delete_by_ids(&rollback_coll, &keys).await },
            );
        }
        if flush_wanted {
            let flush_client = client.clone();
            let flush_coll = collection.clone();
            txn.add_irreversible("flush", move || async move {
                flush_client.flush(&flush_coll).await?;
                Ok(json!(null))
            });
        }
        let results = txn.execute().await?;

        let inserted = results
            .first()
            .and_then(Value::as_u64)
            .unwrap_or(batch_size as u64);
        info!(collection = %collection, inserted, flushed = flush_wanted, "Insert committed");
        Ok(InsertOutcome {
            inserted,
            flushed: flush_wanted,
        })
    }

    /// Dense-only or hybrid search against the tenant+model collection
    ///
    /// Hybrid searches tokenise `text_filter`; when fewer than
    /// `minimum_words_match` tokens survive stop-word filtering the search
    /// falls back to dense-only. The returned score is the RRF score for
    /// hybrid results and the raw dense score otherwise, which is also why
    /// `score_threshold` only applies to the dense-only path.
    ///
    /// # Errors
    ///
    /// `GatewayError::Validation` for a bad limit or dimension,
    /// `GatewayError::Operation` when the collection is missing.
    pub async fn search(
        &self,
        client: Arc<dyn VectorBackend>,
        tenant: &TenantCode,
        model: &str,
        request: &SearchRequest,
    ) -> Result<Vec<SearchHit>> {
        if request.limit == 0 {
            return Err(GatewayError::validation("limit must be at least 1"));
        }
        let collection = tenant.collection_name(model);
        let description = client
            .describe_collection(&collection)
            .await?
            .ok_or_else(|| {
                GatewayError::operation(format!(
                    "collection {collection} does not exist; generate the schema first"
                ))
            })?;
        if request.vector.len() != description.dimension {
            return Err(GatewayError::validation(format!(
                "query vector has dimension {}, collection expects {}",
                request.vector.len(),
                description.dimension
            )));
        }

        let query_tokens = if request.hybrid {
            request
                .text_filter
                .as_deref()
                .map(|text| tokenize(text, request.include_stop_words))
                .unwrap_or_default()
        } else {
            Vec::new()
        };

        let run_hybrid = request.hybrid && query_tokens.len() >= request.minimum_words_match.max(1);

        if !run_hybrid {
            if request.hybrid {
                debug!(
                    collection = %collection,
                    "Too few query tokens for hybrid search, falling back to dense"
                );
            }
            let mut hits = client
                .dense_search(&collection, &request.vector, request.limit)
                .await?;
            if let Some(threshold) = request.score_threshold {
                hits.retain(|hit| hit.score >= threshold);
            }
            return Ok(hits);
        }

        let dense_hits = client
            .dense_search(&collection, &request.vector, request.limit)
            .await?;
        let sparse_query = self.encoder.encode_query(&query_tokens);
        let sparse_hits = client
            .sparse_search(&collection, &sparse_query, request.limit)
            .await?;

        Ok(rrf_fuse(dense_hits, sparse_hits, request.limit))
    }

    /// Explicit flush of the tenant+model collection
    ///
    /// # Errors
    ///
    /// Surfaces backend failures as `GatewayError::Operation`.
    pub async fn flush(
        &self,
        client: Arc<dyn VectorBackend>,
        tenant: &TenantCode,
        model: &str,
    ) -> Result<()> {
        let collection = tenant.collection_name(model);
        client.flush(&collection).await
    }
}

/// Reciprocal Rank Fusion over the dense and sparse rankings
///
/// `score(d) = Σ 1 / (k + rank(d))` over the lists containing `d`, with
/// `k = 60` and ranks starting at 1. Ties break by dense score descending,
/// then id ascending.
fn rrf_fuse(dense: Vec<SearchHit>, sparse: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    struct Fused {
        hit: SearchHit,
        rrf: f32,
        dense_score: f32,
    }

    let mut fused: HashMap<String, Fused> = HashMap::new();

    for (rank, hit) in dense.into_iter().enumerate() {
        let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
        let dense_score = hit.score;
        fused.insert(
            hit.id.clone(),
            Fused {
                hit,
                rrf: contribution,
                dense_score,
            },
        );
    }

    for (rank, hit) in sparse.into_iter().enumerate() {
        let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
        match fused.get_mut(&hit.id) {
            Some(existing) => existing.rrf += contribution,
            None => {
                fused.insert(
                    hit.id.clone(),
                    Fused {
                        hit,
                        rrf: contribution,
                        dense_score: f32::MIN,
                    },
                );
            }
        }
    }

    let mut merged: Vec<Fused> = fused.into_values().collect();
    merged.sort_by(|a, b| {
        b.rrf
            .partial_cmp(&a.rrf)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.dense_score
                    .partial_cmp(&a.dense_score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.hit.id.cmp(&b.hit.id))
    });

    merged
        .into_iter()
        .take(limit)
        .map(|entry| {
            let mut hit = entry.hit;
            hit.score = entry.rrf;
            hit
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flouds_core::mocks::{MockCluster, MockVectorBackend};
    use flouds_core::types::vector::{
        CollectionSchema, DistanceMetric, IndexKind,
    };

    async fn setup(dimension: usize) -> (Arc<MockCluster>, Arc<dyn VectorBackend>, TenantCode) {
        let cluster = MockCluster::new();
        let tenant = TenantCode::parse("demo").unwrap();
        let client = MockVectorBackend::new(cluster.clone(), tenant.database_name());
        client.create_database(&tenant.database_name()).await.unwrap();
        client
            .create_collection(&CollectionSchema {
                name: tenant.collection_name("m1"),
                dimension,
                metric: DistanceMetric::Cosine,
                index: IndexKind::IvfFlat,
                nlist: 256,
                metadata_length: 4096,
                drop_ratio_build: 0.2,
            })
            .await
            .unwrap();
        (cluster, Arc::new(client), tenant)
    }

    fn embedded(key: &str, chunk: &str, vector: Vec<f32>) -> EmbeddedVector {
        EmbeddedVector {
            key: key.to_string(),
            chunk: chunk.to_string(),
            model: None,
            metadata: serde_json::Map::new(),
            vector,
        }
    }

    fn dense_request(vector: Vec<f32>, limit: usize) -> SearchRequest {
        SearchRequest {
            vector,
            limit,
            score_threshold: None,
            hybrid: false,
            text_filter: None,
            minimum_words_match: 1,
            include_stop_words: false,
        }
    }

    #[tokio::test]
    async fn test_insert_then_dense_search() {
        let (_cluster, client, tenant) = setup(4).await;
        let engine = VectorStoreEngine::new(100);

        let outcome = engine
            .insert(
                client.clone(),
                &tenant,
                "m1",
                vec![
                    embedded("a", "hello world", vec![1.0, 0.0, 0.0, 0.0]),
                    embedded("b", "goodbye", vec![0.0, 1.0, 0.0, 0.0]),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 2);
        assert!(!outcome.flushed, "small batch defers flush");

        let hits = engine
            .search(
                client,
                &tenant,
                "m1",
                &dense_request(vec![1.0, 0.0, 0.0, 0.0], 2),
            )
            .await
            .unwrap();
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_insert_duplicate_keys_last_write_wins() {
        let (_cluster, client, tenant) = setup(2).await;
        let engine = VectorStoreEngine::new(100);
        let outcome = engine
            .insert(
                client.clone(),
                &tenant,
                "m1",
                vec![
                    embedded("a", "first version", vec![1.0, 0.0]),
                    embedded("a", "second version", vec![0.0, 1.0]),
                ],
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.inserted, 1);

        let hit = client
            .query_by_id(&tenant.collection_name("m1"), "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(hit.chunk, "second version");
    }

    #[tokio::test]
    async fn test_insert_validates_dimension_and_chunk() {
        let (_cluster, client, tenant) = setup(4).await;
        let engine = VectorStoreEngine::new(100);

        let err = engine
            .insert(
                client.clone(),
                &tenant,
                "m1",
                vec![embedded("a", "text", vec![1.0, 0.0])],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));

        let err = engine
            .insert(
                client,
                &tenant,
                "m1",
                vec![embedded("a", "", vec![1.0, 0.0, 0.0, 0.0])],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_insert_missing_collection_is_operation_error() {
        let (_cluster, client, tenant) = setup(4).await;
        let engine = VectorStoreEngine::new(100);
        let err = engine
            .insert(
                client,
                &tenant,
                "unknown-model",
                vec![embedded("a", "text", vec![1.0, 0.0, 0.0, 0.0])],
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Operation { .. }));
    }

    #[tokio::test]
    async fn test_auto_flush_threshold() {
        let (cluster, client, tenant) = setup(2).await;
        let engine = VectorStoreEngine::new(2);
        let outcome = engine
            .insert(
                client.clone(),
                &tenant,
                "m1",
                vec![
                    embedded("a", "one", vec![1.0, 0.0]),
                    embedded("b", "two", vec![0.0, 1.0]),
                ],
                None,
            )
            .await
            .unwrap();
        assert!(outcome.flushed);
        assert_eq!(
            cluster
                .flush_count(&tenant.database_name(), &tenant.collection_name("m1"))
                .await,
            1
        );
    }

    #[tokio::test]
    async fn test_failed_flush_rolls_back_upsert() {
        let (cluster, client, tenant) = setup(2).await;
        let engine = VectorStoreEngine::new(1);
        cluster.fail_once("flush", "flush broke").await;

        let err = engine
            .insert(
                client.clone(),
                &tenant,
                "m1",
                vec![embedded("a", "one", vec![1.0, 0.0])],
                None,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("flush broke"));

        // The upsert was rolled back by deleting its keys
        assert_eq!(
            cluster
                .row_count(&tenant.database_name(), &tenant.collection_name("m1"))
                .await,
            0
        );
    }

    #[tokio::test]
    async fn test_score_threshold_applies_to_dense_only() {
        let (_cluster, client, tenant) = setup(2).await;
        let engine = VectorStoreEngine::new(100);
        engine
            .insert(
                client.clone(),
                &tenant,
                "m1",
                vec![
                    embedded("near", "close match", vec![1.0, 0.0]),
                    embedded("far", "distant match", vec![0.0, 1.0]),
                ],
                None,
            )
            .await
            .unwrap();

        let mut request = dense_request(vec![1.0, 0.0], 10);
        request.score_threshold = Some(0.5);
        let hits = engine.search(client, &tenant, "m1", &request).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "near");
    }

    #[tokio::test]
    async fn test_limit_zero_rejected_and_limit_one_respected() {
        let (_cluster, client, tenant) = setup(2).await;
        let engine = VectorStoreEngine::new(100);
        engine
            .insert(
                client.clone(),
                &tenant,
                "m1",
                vec![
                    embedded("a", "one", vec![1.0, 0.0]),
                    embedded("b", "two", vec![0.0, 1.0]),
                ],
                None,
            )
            .await
            .unwrap();

        assert!(engine
            .search(client.clone(), &tenant, "m1", &dense_request(vec![1.0, 0.0], 0))
            .await
            .is_err());

        let hits = engine
            .search(client, &tenant, "m1", &dense_request(vec![1.0, 0.0], 1))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_hybrid_rrf_promotes_sparse_match() {
        let (_cluster, client, tenant) = setup(4).await;
        let engine = VectorStoreEngine::new(100);
        engine
            .insert(
                client.clone(),
                &tenant,
                "m1",
                vec![
                    embedded("a", "hello world", vec![1.0, 0.0, 0.0, 0.0]),
                    embedded("b", "goodbye", vec![0.0, 1.0, 0.0, 0.0]),
                ],
                None,
            )
            .await
            .unwrap();

        // Dense alone prefers a
        let dense_hits = engine
            .search(
                client.clone(),
                &tenant,
                "m1",
                &dense_request(vec![0.9, 0.1, 0.0, 0.0], 2),
            )
            .await
            .unwrap();
        assert_eq!(dense_hits[0].id, "a");

        // Hybrid: b is rank 1 in sparse (1/61) and rank 2 in dense (1/62),
        // a only rank 1 in dense (1/61); b wins on RRF
        let request = SearchRequest {
            vector: vec![0.9, 0.1, 0.0, 0.0],
            limit: 2,
            score_threshold: None,
            hybrid: true,
            text_filter: Some("goodbye".to_string()),
            minimum_words_match: 1,
            include_stop_words: false,
        };
        let hits = engine.search(client, &tenant, "m1", &request).await.unwrap();
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[1].id, "a");
        let expected_b = 1.0 / 61.0 + 1.0 / 62.0;
        let expected_a = 1.0 / 61.0;
        assert!((hits[0].score - expected_b).abs() < 1e-5);
        assert!((hits[1].score - expected_a).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_hybrid_stop_word_only_filter_falls_back_to_dense() {
        let (_cluster, client, tenant) = setup(2).await;
        let engine = VectorStoreEngine::new(100);
        engine
            .insert(
                client.clone(),
                &tenant,
                "m1",
                vec![
                    embedded("a", "alpha content", vec![1.0, 0.0]),
                    embedded("b", "beta content", vec![0.0, 1.0]),
                ],
                None,
            )
            .await
            .unwrap();

        let request = SearchRequest {
            vector: vec![1.0, 0.0],
            limit: 2,
            score_threshold: None,
            hybrid: true,
            text_filter: Some("the and of".to_string()),
            minimum_words_match: 1,
            include_stop_words: false,
        };
        let hits = engine.search(client, &tenant, "m1", &request).await.unwrap();
        // Dense ordering: scores are raw dense similarities, not RRF
        assert_eq!(hits[0].id, "a");
        assert!(hits[0].score > 0.9);
    }
}
