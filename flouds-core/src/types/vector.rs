//! Vector collection schema and data-plane types
//!
//! Every `(tenant, model)` pair owns one physical collection with a fixed
//! field layout: a VARCHAR primary key, a dense float vector, a sparse
//! (BM25) vector, the source chunk, the model name, and a JSON metadata
//! column. Dimension is fixed at collection creation.

use crate::error::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Inclusive dense-dimension bounds accepted at schema creation
pub const MIN_DIMENSION: usize = 1;
/// Upper bound on the dense dimension
pub const MAX_DIMENSION: usize = 4096;
/// Primary-key VARCHAR capacity
pub const MAX_VECTOR_ID_LEN: usize = 512;

/// Field names of the fixed collection layout
pub mod fields {
    pub const ID: &str = "flouds_vector_id";
    pub const DENSE: &str = "flouds_vector";
    pub const SPARSE: &str = "sparse";
    pub const CHUNK: &str = "chunk";
    pub const MODEL: &str = "model";
    pub const META: &str = "meta";
}

/// Distance metric for the dense vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
    Ip,
}

impl DistanceMetric {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cosine => "COSINE",
            Self::L2 => "L2",
            Self::Ip => "IP",
        }
    }

    /// Parse the wire spelling (`COSINE`, `L2`, `IP`), case-insensitively
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Validation` for unknown metrics.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "COSINE" => Ok(Self::Cosine),
            "L2" => Ok(Self::L2),
            "IP" => Ok(Self::Ip),
            other => Err(GatewayError::validation(format!(
                "unsupported metric type: {other}"
            ))),
        }
    }
}

/// Dense index algorithm requested at schema creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IndexKind {
    #[default]
    #[serde(rename = "IVF_FLAT")]
    IvfFlat,
    #[serde(rename = "IVF_SQ8")]
    IvfSq8,
    #[serde(rename = "HNSW")]
    Hnsw,
    #[serde(rename = "FLAT")]
    Flat,
    #[serde(rename = "AUTOINDEX")]
    AutoIndex,
}

impl IndexKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IvfFlat => "IVF_FLAT",
            Self::IvfSq8 => "IVF_SQ8",
            Self::Hnsw => "HNSW",
            Self::Flat => "FLAT",
            Self::AutoIndex => "AUTOINDEX",
        }
    }

    /// Parse the wire spelling, case-insensitively
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::Validation` for unknown index types.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "IVF_FLAT" => Ok(Self::IvfFlat),
            "IVF_SQ8" => Ok(Self::IvfSq8),
            "HNSW" => Ok(Self::Hnsw),
            "FLAT" => Ok(Self::Flat),
            "AUTOINDEX" => Ok(Self::AutoIndex),
            other => Err(GatewayError::validation(format!(
                "unsupported index type: {other}"
            ))),
        }
    }
}

/// Sparse vector: token dimension -> weight, as produced by BM25 encoding
///
/// Dimensions are stable token hashes; weights are term-frequency scores.
/// Ordering is kept deterministic for serialization and tests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector(pub BTreeMap<u32, f32>);

impl SparseVector {
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn set(&mut self, dim: u32, weight: f32) {
        self.0.insert(dim, weight);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Dot product against another sparse vector
    #[must_use]
    pub fn dot(&self, other: &Self) -> f32 {
        self.0
            .iter()
            .filter_map(|(dim, w)| other.0.get(dim).map(|ow| w * ow))
            .sum()
    }
}

/// Insert unit accepted on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedVector {
    /// Primary key within the collection; repeats overwrite (upsert)
    pub key: String,
    /// Source text the dense vector was computed from
    pub chunk: String,
    /// Optional per-row model override; defaults to the request model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Free-form metadata serialised into the JSON column
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
    /// Dense embedding; length must equal the collection dimension
    pub vector: Vec<f32>,
}

/// Fully-materialised row handed to the backend upsert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRow {
    pub id: String,
    pub dense: Vec<f32>,
    pub sparse: SparseVector,
    pub chunk: String,
    pub model: String,
    pub meta: Value,
}

/// Collection schema handed to the backend at creation time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub index: IndexKind,
    /// IVF partition count for IVF index families
    pub nlist: u32,
    /// VARCHAR capacity of the chunk field
    pub metadata_length: u32,
    /// BM25 drop ratio applied when building the sparse index
    pub drop_ratio_build: f32,
}

/// Subset of collection properties the gateway verifies on idempotent calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescription {
    pub name: String,
    pub dimension: usize,
}

/// One search result row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub chunk: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Validate a requested dense dimension against the accepted bounds
///
/// # Errors
///
/// Returns `GatewayError::Validation` outside `1..=4096`.
pub fn validate_dimension(dimension: usize) -> Result<()> {
    if (MIN_DIMENSION..=MAX_DIMENSION).contains(&dimension) {
        Ok(())
    } else {
        Err(GatewayError::validation(format!(
            "dimension must be between {MIN_DIMENSION} and {MAX_DIMENSION}, got {dimension}"
        )))
    }
}
