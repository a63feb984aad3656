//! BM25 tokenisation and sparse encoding
//!
//! Produces the sparse vectors stored next to dense embeddings and the
//! query vectors used by sparse search.
//!
//! # Weighting
//!
//! Document weight for term t:
//!
//! ```text
//! w(t, D) = (f(t, D) · (k1 + 1)) / (f(t, D) + k1 · (1 - b + b · |D| / avgdl))
//! ```
//!
//! with `k1 = 1.5` (term frequency saturation) and `b = 0.75` (length
//! normalisation). There is no corpus-wide IDF at ingest time, so document
//! weights carry the term-frequency component only against an assumed
//! average length; query vectors carry unit weights per distinct token. The
//! backend scores sparse hits as a dot product, which preserves BM25 rank
//! order for short queries.
//!
//! Sparse dimensions are stable token hashes (first four bytes of SHA-256),
//! so two processes encode the same token to the same dimension.

use flouds_core::types::vector::SparseVector;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Fixed English stop-word list, kept sorted for binary search
static STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "aren", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "cannot", "could", "did", "do", "does", "doing", "don", "down", "during",
    "each", "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here",
    "hers", "herself", "him", "himself", "his", "how", "i", "if", "in", "into", "is", "isn", "it",
    "its", "itself", "just", "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of",
    "off", "on", "once", "only", "or", "other", "our", "ours", "ourselves", "out", "over", "own",
    "s", "same", "she", "should", "so", "some", "such", "t", "than", "that", "the", "their",
    "theirs", "them", "themselves", "then", "there", "these", "they", "this", "those", "through",
    "to", "too", "under", "until", "up", "very", "was", "we", "were", "what", "when", "where",
    "which", "while", "who", "whom", "why", "will", "with", "would", "you", "your", "yours",
    "yourself", "yourselves",
];

/// Whether a lowercase token is on the fixed stop-word list
#[must_use]
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Lowercase and split on non-alphanumeric boundaries
///
/// Stop words are dropped unless `include_stop_words` is set.
#[must_use]
pub fn tokenize(text: &str, include_stop_words: bool) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .filter(|token| include_stop_words || !is_stop_word(token))
        .map(String::from)
        .collect()
}

/// Stable sparse dimension for a token
#[must_use]
pub fn token_dimension(token: &str) -> u32 {
    let digest = Sha256::digest(token.as_bytes());
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// BM25 sparse encoder with fixed parameters
#[derive(Debug, Clone)]
pub struct Bm25SparseEncoder {
    k1: f32,
    b: f32,
    /// Assumed average document length in tokens
    avg_doc_len: f32,
}

impl Default for Bm25SparseEncoder {
    fn default() -> Self {
        Self {
            k1: 1.5,
            b: 0.75,
            avg_doc_len: 64.0,
        }
    }
}

impl Bm25SparseEncoder {
    #[must_use]
    pub const fn new(k1: f32, b: f32, avg_doc_len: f32) -> Self {
        Self { k1, b, avg_doc_len }
    }

    /// Encode a stored chunk into its sparse representation
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn encode_document(&self, text: &str) -> SparseVector {
        let tokens = tokenize(text, false);
        if tokens.is_empty() {
            return SparseVector::new();
        }
        let doc_len = tokens.len() as f32;

        let mut term_freq: HashMap<String, usize> = HashMap::new();
        for token in tokens {
            *term_freq.entry(token).or_insert(0) += 1;
        }

        let mut sparse = SparseVector::new();
        for (token, tf) in term_freq {
            let tf = tf as f32;
            let denominator = self
                .k1
                .mul_add(1.0 - self.b + self.b * doc_len / self.avg_doc_len, tf);
            let weight = (tf * (self.k1 + 1.0)) / denominator;
            sparse.set(token_dimension(&token), weight);
        }
        sparse
    }

    /// Encode query tokens with unit weights
    #[must_use]
    pub fn encode_query(&self, tokens: &[String]) -> SparseVector {
        let mut sparse = SparseVector::new();
        for token in tokens {
            sparse.set(token_dimension(token), 1.0);
        }
        sparse
    }
}
