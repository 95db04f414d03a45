//! Embedding infrastructure for Formulary.
//!
//! This crate provides the embedding collaborator abstraction used by the
//! search engine's term embedder, plus the vector math shared by index
//! implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     formulary-vector                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  EmbeddingProvider trait                                    │
//! │  ├── MockEmbeddingProvider (deterministic, text-derived)    │
//! │  ├── StaticEmbeddingProvider (canned table, scripted errors)│
//! │  └── RetryingEmbeddingProvider (backoff decorator)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  cosine_similarity / clamp_score                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use formulary_vector::{EmbeddingProvider, RetryingEmbeddingProvider, MockEmbeddingProvider};
//! use std::sync::Arc;
//!
//! let provider = RetryingEmbeddingProvider::new(Arc::new(MockEmbeddingProvider::new(384)));
//! let vector = provider.embed("rosuvastatin").await?;
//! ```

pub mod embedding;
pub mod retry;
pub mod similarity;

// Re-exports: traits and providers
pub use embedding::{EmbeddingProvider, MockEmbeddingProvider, StaticEmbeddingProvider};
pub use retry::RetryingEmbeddingProvider;

// Re-exports: vector math
pub use similarity::{clamp_score, cosine_similarity};
