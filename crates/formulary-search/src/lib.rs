//! Medication search engine for Formulary.
//!
//! Turns search terms, per-term embeddings and structured filters into
//! ranked drug families: brand or generic groupings of formulations, each
//! badged as an exact match, a pharmacologic equivalent (same active
//! ingredient) or a therapeutic alternative (same therapeutic class).
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     formulary-search                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SearchEngine (per-request pipeline)                        │
//! │  ├── StrategySelector (single-term / multi-term / filters)  │
//! │  ├── TermEmbedder (EmbeddingProvider, request deadline)     │
//! │  ├── HybridExecutor (FormularyIndex, FilterClause)          │
//! │  ├── ExpansionController (ingredient + therapeutic class)   │
//! │  ├── ExclusionFilter (compounding bases and supplies)       │
//! │  ├── group() (brand:/ingredient: families)                  │
//! │  ├── MatchClassifier (strongest badge per family)           │
//! │  └── rank() (priority, similarity, display name)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  FormularyIndex trait                                       │
//! │  └── InMemoryIndex (filter evaluation + cosine ranking)     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  SearchConfig (confyg: file, FORMULARY_* env, defaults)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use formulary_search::{InMemoryIndex, SearchConfig, SearchEngine, SearchFilters};
//! use formulary_vector::MockEmbeddingProvider;
//! use std::sync::Arc;
//!
//! let engine = SearchEngine::new(
//!     SearchConfig::load(None)?,
//!     Arc::new(MockEmbeddingProvider::new(384)),
//!     Arc::new(index),
//! )?;
//!
//! let request = engine.request("crestor", Some(understanding_json), SearchFilters::default(), None);
//! let response = engine.search(&request).await?;
//! for family in &response.families {
//!     println!("{} ({:?}): {}", family.display_name, family.match_type, family.match_reason);
//! }
//! ```

pub mod classify;
pub mod config;
pub mod diagnostics;
pub mod embedder;
pub mod engine;
pub mod executor;
pub mod expansion;
pub mod filters;
pub mod grouping;
pub mod index;
pub mod rank;
pub mod strategy;
pub mod types;
pub mod understanding;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod testing;

// Re-exports: engine and configuration
pub use config::SearchConfig;
pub use engine::{NO_RESULTS_MESSAGE, SearchEngine, SearchResponse};

// Re-exports: data model
pub use diagnostics::{SearchDiagnostics, SubQueryReport};
pub use filters::{FilterClause, FilterKey, SearchFilters};
pub use strategy::SearchStrategy;
pub use types::{DrugFamily, FormulationRecord, MatchType, Provenance, SearchRequest};
pub use understanding::QueryUnderstanding;

// Re-exports: collaborators
pub use index::{FormularyIndex, InMemoryIndex, IndexQuery};
