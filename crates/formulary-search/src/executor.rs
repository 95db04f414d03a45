//! Hybrid query executor.
//!
//! Issues one query against the index, bounded by the request deadline, and
//! normalizes what comes back: provenance stamped, similarity clamped to
//! `[0, 1]` for vector queries and cleared for filter queries, duplicates
//! within the response dropped.

use formulary_core::{Error, Result};
use formulary_vector::clamp_score;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::time::Instant;

use crate::filters::FilterClause;
use crate::index::{FormularyIndex, IndexQuery};
use crate::types::{FormulationRecord, Provenance};

/// Runs filter and filter-plus-vector queries against the index.
#[derive(Clone)]
pub struct HybridExecutor {
    index: Arc<dyn FormularyIndex>,
    min_similarity: f32,
}

impl HybridExecutor {
    /// Create an executor over an index.
    pub fn new(index: Arc<dyn FormularyIndex>) -> Self {
        Self {
            index,
            min_similarity: 0.0,
        }
    }

    /// Set the minimum similarity passed with vector queries.
    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity;
        self
    }

    /// Index name for diagnostics.
    pub fn index_name(&self) -> &str {
        self.index.name()
    }

    /// Run one query and stamp `provenance` on every record.
    pub async fn execute(
        &self,
        filter: &FilterClause,
        vector: Option<Vec<f32>>,
        limit: usize,
        provenance: Provenance,
        deadline: Instant,
    ) -> Result<Vec<FormulationRecord>> {
        let is_vector = vector.is_some();
        let query = match vector {
            Some(vector) => IndexQuery::hybrid(filter.clone(), vector, limit)
                .with_min_similarity(self.min_similarity),
            None => IndexQuery::filter_only(filter.clone(), limit),
        };

        let records = tokio::time::timeout_at(deadline, self.index.search(&query))
            .await
            .map_err(|_| {
                Error::timeout(format!(
                    "{} query on {} exceeded the request deadline",
                    provenance,
                    self.index.name()
                ))
            })??;

        let mut seen = HashSet::new();
        let stamped: Vec<FormulationRecord> = records
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .take(limit)
            .map(|mut record| {
                record.provenance = provenance;
                record.similarity = if is_vector {
                    record.similarity.map(clamp_score)
                } else {
                    None
                };
                record
            })
            .collect();

        log::debug!(
            "{provenance} query on {} returned {} records",
            self.index.name(),
            stamped.len()
        );
        Ok(stamped)
    }
}

impl std::fmt::Debug for HybridExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridExecutor")
            .field("index", &self.index.name())
            .field("min_similarity", &self.min_similarity)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::{SlowIndex, StubIndex};
    use std::time::Duration;

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test]
    async fn test_stamps_provenance_and_clamps() {
        let stub = StubIndex::new(vec![
            FormulationRecord::new("1", "A").found_by(Provenance::StructuredFilter, Some(1.4)),
            FormulationRecord::new("2", "B").found_by(Provenance::StructuredFilter, Some(-0.2)),
        ]);
        let executor = HybridExecutor::new(Arc::new(stub));
        let records = executor
            .execute(
                &FilterClause::new(),
                Some(vec![1.0]),
                10,
                Provenance::Vector,
                far_deadline(),
            )
            .await
            .unwrap();

        assert!(records.iter().all(|r| r.provenance == Provenance::Vector));
        assert_eq!(records[0].similarity, Some(1.0));
        assert_eq!(records[1].similarity, Some(0.0));
    }

    #[tokio::test]
    async fn test_filter_query_clears_similarity_and_dedups() {
        let stub = StubIndex::new(vec![
            FormulationRecord::new("1", "A").found_by(Provenance::Vector, Some(0.9)),
            FormulationRecord::new("1", "A again"),
            FormulationRecord::new("2", "B"),
        ]);
        let executor = HybridExecutor::new(Arc::new(stub));
        let records = executor
            .execute(
                &FilterClause::new(),
                None,
                10,
                Provenance::TherapeuticClassFilter,
                far_deadline(),
            )
            .await
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].display_name, "A");
        assert!(records.iter().all(|r| r.similarity.is_none()));
        assert!(
            records
                .iter()
                .all(|r| r.provenance == Provenance::TherapeuticClassFilter)
        );
    }

    #[tokio::test]
    async fn test_truncates_to_limit() {
        let stub = StubIndex::new(vec![
            FormulationRecord::new("1", "A"),
            FormulationRecord::new("2", "B"),
            FormulationRecord::new("3", "C"),
        ]);
        let executor = HybridExecutor::new(Arc::new(stub));
        let records = executor
            .execute(
                &FilterClause::new(),
                None,
                2,
                Provenance::StructuredFilter,
                far_deadline(),
            )
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_index_error_is_returned() {
        let executor = HybridExecutor::new(Arc::new(crate::testing::FailingIndex));
        let err = executor
            .execute(
                &FilterClause::new(),
                None,
                10,
                Provenance::StructuredFilter,
                far_deadline(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Index(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expiry_is_timeout() {
        let executor = HybridExecutor::new(Arc::new(SlowIndex::new(Duration::from_secs(30))));
        let deadline = Instant::now() + Duration::from_millis(50);
        let err = executor
            .execute(
                &FilterClause::new(),
                None,
                10,
                Provenance::StructuredFilter,
                deadline,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
