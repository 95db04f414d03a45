//! Embedding provider trait and test implementations.
//!
//! This module defines the `EmbeddingProvider` trait that abstracts over
//! the external embedding service (Titan, SapBERT, a local model, ...).
//! The search engine only ever asks for one vector per search term; any
//! caching belongs to the provider, not to the engine.
//!
//! # Providers
//!
//! - `MockEmbeddingProvider`: Deterministic fixed-dimension vectors derived from the text
//! - `StaticEmbeddingProvider`: A lookup table of canned vectors with scripted failures

use async_trait::async_trait;
use formulary_core::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Trait for generating text embeddings.
///
/// Implementations wrap a specific embedding backend and provide a uniform
/// async interface. The trait requires `Send + Sync` so one provider can be
/// shared by the concurrent per-term sub-queries of a request.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// The embedding dimension (0 when the provider does not know it up front).
    fn dimension(&self) -> usize;

    /// The provider name for diagnostics.
    fn name(&self) -> &str;
}

/// A mock embedding provider for testing.
///
/// Generates deterministic vectors based on the input text bytes, producing
/// consistent embeddings for the same input.
pub struct MockEmbeddingProvider {
    dimension: usize,
}

impl MockEmbeddingProvider {
    /// Create a new mock provider with the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn deterministic_embedding(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimension];
        let bytes = text.as_bytes();

        for (i, val) in embedding.iter_mut().enumerate() {
            let byte_val = if bytes.is_empty() {
                0u8
            } else {
                bytes[i % bytes.len()]
            };
            *val = ((byte_val as f32 + i as f32) % 256.0) / 256.0;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut embedding {
                *val /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.deterministic_embedding(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// An embedding provider backed by a fixed table of vectors.
///
/// Lookups are case-insensitive. Texts registered with [`fail_on`](Self::fail_on)
/// return an embedding error, and texts missing from the table return an
/// embedding error too. Every call is counted, including failed ones.
#[derive(Debug, Default)]
pub struct StaticEmbeddingProvider {
    dimension: usize,
    vectors: HashMap<String, Vec<f32>>,
    failing: HashSet<String>,
    calls: AtomicUsize,
}

impl StaticEmbeddingProvider {
    /// Create an empty table for vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            ..Default::default()
        }
    }

    /// Register the vector returned for `text`.
    pub fn with_vector(mut self, text: impl AsRef<str>, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.as_ref().to_lowercase(), vector);
        self
    }

    /// Make every request for `text` fail.
    pub fn fail_on(mut self, text: impl AsRef<str>) -> Self {
        self.failing.insert(text.as_ref().to_lowercase());
        self
    }

    /// Number of `embed` calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let key = text.to_lowercase();

        if self.failing.contains(&key) {
            return Err(Error::embedding(format!(
                "embedding service rejected '{text}'"
            )));
        }

        self.vectors
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::embedding(format!("no vector registered for '{text}'")))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "static"
    }
}

// ============================================================================
// Tests
// ============================================================================
