//! The formulary index collaborator.
//!
//! The engine only needs one operation from the index: a filter clause with
//! an optional nearest-neighbour vector. [`InMemoryIndex`] evaluates both in
//! process and backs the tests and local use.

use async_trait::async_trait;
use formulary_core::{Error, Result};
use formulary_vector::{clamp_score, cosine_similarity};
use std::cmp::Ordering;

use crate::filters::FilterClause;
use crate::types::FormulationRecord;

// ============================================================================
// Query
// ============================================================================

/// One query against the index.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    /// AND-ed structured constraints.
    pub filter: FilterClause,
    /// Nearest-neighbour vector; `None` for a pure filter query.
    pub vector: Option<Vec<f32>>,
    /// Maximum records to return.
    pub limit: usize,
    /// Vector hits below this similarity are not returned.
    pub min_similarity: f32,
}

impl IndexQuery {
    /// A pure filter query.
    pub fn filter_only(filter: FilterClause, limit: usize) -> Self {
        Self {
            filter,
            vector: None,
            limit,
            min_similarity: 0.0,
        }
    }

    /// Filter clause AND nearest-neighbour ranking.
    pub fn hybrid(filter: FilterClause, vector: Vec<f32>, limit: usize) -> Self {
        Self {
            filter,
            vector: Some(vector),
            limit,
            min_similarity: 0.0,
        }
    }

    /// Set the minimum similarity for vector hits.
    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    /// Whether this query carries a vector.
    pub fn is_vector(&self) -> bool {
        self.vector.is_some()
    }
}

// ============================================================================
// Index trait
// ============================================================================

/// Hybrid attribute and vector search over formulation records.
///
/// Implementations return records with `similarity` set for vector queries
/// and unset for filter queries. They must never be mutated by a search.
#[async_trait]
pub trait FormularyIndex: Send + Sync {
    /// Run one query.
    async fn search(&self, query: &IndexQuery) -> Result<Vec<FormulationRecord>>;

    /// Index name for diagnostics.
    fn name(&self) -> &str;

    /// Number of indexed records.
    fn document_count(&self) -> Result<usize>;
}

// ============================================================================
// In-memory index
// ============================================================================

/// A formulation record with its embedding.
#[derive(Debug, Clone)]
pub struct IndexedFormulation {
    /// The record; its `similarity` and `provenance` are ignored.
    pub record: FormulationRecord,
    /// Embedding used for nearest-neighbour ranking.
    pub embedding: Vec<f32>,
}

/// Brute-force index over records held in memory.
///
/// Filter queries return matches in insertion order. Vector queries rank
/// matches by cosine similarity, ties keeping insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIndex {
    entries: Vec<IndexedFormulation>,
    dimension: Option<usize>,
}

impl InMemoryIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record, builder style.
    pub fn with_record(mut self, record: FormulationRecord, embedding: Vec<f32>) -> Result<Self> {
        self.insert(record, embedding)?;
        Ok(self)
    }

    /// Add a record. Every embedding must share one dimension.
    pub fn insert(&mut self, record: FormulationRecord, embedding: Vec<f32>) -> Result<()> {
        match self.dimension {
            Some(dim) if dim != embedding.len() => {
                return Err(Error::invalid_data(format!(
                    "record {} has embedding dimension {}, index uses {dim}",
                    record.id,
                    embedding.len()
                )));
            }
            None => self.dimension = Some(embedding.len()),
            _ => {}
        }

        if self.entries.iter().any(|e| e.record.id == record.id) {
            return Err(Error::invalid_data(format!(
                "duplicate record id {}",
                record.id
            )));
        }

        self.entries.push(IndexedFormulation { record, embedding });
        Ok(())
    }

    /// Embedding dimension, once the first record is inserted.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn filter_search(&self, query: &IndexQuery) -> Vec<FormulationRecord> {
        self.entries
            .iter()
            .filter(|e| query.filter.matches(&e.record))
            .take(query.limit)
            .map(|e| {
                let mut record = e.record.clone();
                record.similarity = None;
                record
            })
            .collect()
    }

    fn vector_search(&self, query: &IndexQuery, vector: &[f32]) -> Result<Vec<FormulationRecord>> {
        if let Some(dim) = self.dimension {
            if dim != vector.len() {
                return Err(Error::index(format!(
                    "query vector has dimension {}, index uses {dim}",
                    vector.len()
                )));
            }
        }

        let mut scored: Vec<(f32, &IndexedFormulation)> = self
            .entries
            .iter()
            .filter(|e| query.filter.matches(&e.record))
            .map(|e| (clamp_score(cosine_similarity(vector, &e.embedding)), e))
            .filter(|(score, _)| *score >= query.min_similarity)
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        scored.truncate(query.limit);

        Ok(scored
            .into_iter()
            .map(|(score, e)| {
                let mut record = e.record.clone();
                record.similarity = Some(score);
                record
            })
            .collect())
    }
}

#[async_trait]
impl FormularyIndex for InMemoryIndex {
    async fn search(&self, query: &IndexQuery) -> Result<Vec<FormulationRecord>> {
        if query.limit == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        match query.vector.as_deref() {
            Some(vector) => self.vector_search(query, vector),
            None => Ok(self.filter_search(query)),
        }
    }

    fn name(&self) -> &str {
        "in_memory"
    }

    fn document_count(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;
    use crate::filters::SearchFilters;

    fn index() -> InMemoryIndex {
        InMemoryIndex::new()
            .with_record(
                FormulationRecord::new("1", "CRESTOR 10 MG TABLET")
                    .with_brand("CRESTOR")
                    .with_form("TABLET", "10 MG"),
                vec![1.0, 0.0, 0.0],
            )
            .unwrap()
            .with_record(
                FormulationRecord::new("2", "HYDROCORTISONE 1% CREAM").with_form("CREAM", "1%"),
                vec![0.0, 1.0, 0.0],
            )
            .unwrap()
            .with_record(
                FormulationRecord::new("3", "ROSUVASTATIN 10 MG TABLET").with_form("TABLET", "10 MG"),
                vec![0.9, 0.1, 0.0],
            )
            .unwrap()
    }

    #[tokio::test]
    async fn test_vector_search_ranks_by_similarity() {
        let idx = index();
        let query = IndexQuery::hybrid(FilterClause::new(), vec![1.0, 0.0, 0.0], 10);
        let results = idx.search(&query).await.unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3", "2"]);
        assert!((results[0].similarity.unwrap() - 1.0).abs() < 1e-6);
        assert_eq!(results[2].similarity, Some(0.0));
    }

    #[tokio::test]
    async fn test_vector_search_min_similarity_and_limit() {
        let idx = index();
        let query = IndexQuery::hybrid(FilterClause::new(), vec![1.0, 0.0, 0.0], 10)
            .with_min_similarity(0.5);
        assert_eq!(idx.search(&query).await.unwrap().len(), 2);

        let query = IndexQuery::hybrid(FilterClause::new(), vec![1.0, 0.0, 0.0], 1);
        assert_eq!(idx.search(&query).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_vector_search_applies_filter() {
        let filters = SearchFilters {
            is_generic: Some(true),
            ..Default::default()
        };
        let clause = FilterClause::from_filters(&filters, &FilterConfig::default()).unwrap();
        let query = IndexQuery::hybrid(clause, vec![1.0, 0.0, 0.0], 10);
        let results = index().search(&query).await.unwrap();
        assert!(results.iter().all(|r| r.is_generic));
        assert_eq!(results[0].id, "3");
    }

    #[tokio::test]
    async fn test_filter_search_keeps_index_order() {
        let filters = SearchFilters {
            dosage_form: Some("tablet".to_string()),
            ..Default::default()
        };
        let clause = FilterClause::from_filters(&filters, &FilterConfig::default()).unwrap();
        let results = index()
            .search(&IndexQuery::filter_only(clause, 10))
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert!(results.iter().all(|r| r.similarity.is_none()));
    }

    #[tokio::test]
    async fn test_vector_dimension_mismatch() {
        let query = IndexQuery::hybrid(FilterClause::new(), vec![1.0, 0.0], 10);
        let err = index().search(&query).await.unwrap_err();
        assert!(matches!(err, Error::Index(_)));
    }

    #[tokio::test]
    async fn test_empty_index_and_zero_limit() {
        let empty = InMemoryIndex::new();
        let query = IndexQuery::filter_only(FilterClause::new(), 10);
        assert!(empty.search(&query).await.unwrap().is_empty());
        assert_eq!(empty.document_count().unwrap(), 0);

        let query = IndexQuery::filter_only(FilterClause::new(), 0);
        assert!(index().search(&query).await.unwrap().is_empty());
    }

    #[test]
    fn test_insert_rejects_bad_records() {
        let mut idx = index();
        assert_eq!(idx.dimension(), Some(3));
        assert!(idx
            .insert(FormulationRecord::new("9", "X"), vec![1.0])
            .is_err());
        assert!(idx
            .insert(FormulationRecord::new("1", "DUP"), vec![1.0, 0.0, 0.0])
            .is_err());
        assert_eq!(idx.document_count().unwrap(), 3);
    }

    #[test]
    fn test_index_name() {
        assert_eq!(InMemoryIndex::new().name(), "in_memory");
        assert!(IndexQuery::hybrid(FilterClause::new(), vec![1.0], 1).is_vector());
        assert!(!IndexQuery::filter_only(FilterClause::new(), 1).is_vector());
    }
}
