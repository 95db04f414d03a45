//! The search engine.
//!
//! One call to [`SearchEngine::search`] runs the whole pipeline for a
//! request:
//!
//! ```text
//! strategy ─► embed + query (per term, bounded concurrency) ─► exclusions
//!          ─► class expansion ─► exclusions ─► group ─► classify ─► rank
//! ```
//!
//! All state is request-scoped. A failed term or expansion query is skipped
//! and recorded in the diagnostics; only when every primary sub-query fails
//! does the request fail with [`Error::SearchUnavailable`].

use formulary_core::{Error, Result};
use formulary_vector::EmbeddingProvider;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::Instant;

use crate::classify::{ExactMatcher, MatchClassifier};
use crate::config::SearchConfig;
use crate::diagnostics::{SearchDiagnostics, SubQueryKind, SubQueryReport};
use crate::embedder::TermEmbedder;
use crate::executor::HybridExecutor;
use crate::expansion::{ExpansionController, ExpansionPlan, WorkingSet};
use crate::filters::{ExclusionFilter, FilterClause, SearchFilters};
use crate::grouping::group;
use crate::index::FormularyIndex;
use crate::rank::rank;
use crate::strategy::{SearchStrategy, StrategySelector};
use crate::types::{DrugFamily, FormulationRecord, Provenance, SearchRequest};

/// Message returned with an empty result.
pub const NO_RESULTS_MESSAGE: &str = "No results found for the provided criteria.";

// ============================================================================
// Response
// ============================================================================

/// Ranked families plus diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Families in rank order, truncated to the request limit.
    pub families: Vec<DrugFamily>,
    /// Families classified before truncation.
    pub total_families: usize,
    /// Set when there are no families.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Per-request diagnostics.
    pub diagnostics: SearchDiagnostics,
}

impl SearchResponse {
    /// Every variant identifier, in rank order, for batch enrichment.
    pub fn variant_ids(&self) -> Vec<String> {
        self.families
            .iter()
            .flat_map(|f| f.variants.iter().map(|v| v.id.clone()))
            .collect()
    }

    /// Whether no family matched.
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Look up a family by group key.
    pub fn family(&self, group_key: &str) -> Option<&DrugFamily> {
        self.families.iter().find(|f| f.group_key == group_key)
    }
}

type SubQueryOutcome = (SubQueryReport, Result<Vec<FormulationRecord>>);

// ============================================================================
// Engine
// ============================================================================

/// Hybrid medication search over an index and an embedding provider.
pub struct SearchEngine {
    config: SearchConfig,
    selector: StrategySelector,
    embedder: TermEmbedder,
    executor: HybridExecutor,
    expansion: ExpansionController,
    exclusions: ExclusionFilter,
    classifier: MatchClassifier,
}

impl SearchEngine {
    /// Build an engine. Fails on invalid configuration.
    pub fn new(
        config: SearchConfig,
        embeddings: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn FormularyIndex>,
    ) -> Result<Self> {
        config.validate()?;
        let exclusions = ExclusionFilter::new(&config.exclusions)?;
        let executor = HybridExecutor::new(index).with_min_similarity(config.search.min_similarity);

        log::debug!(
            "Search engine ready: embeddings={} index={} exclusions={}",
            embeddings.name(),
            executor.index_name(),
            exclusions.len()
        );

        Ok(Self {
            selector: StrategySelector::new(config.strategy.clone()),
            embedder: TermEmbedder::new(embeddings),
            expansion: ExpansionController::new(executor.clone(), config.search.max_concurrency),
            executor,
            exclusions,
            classifier: MatchClassifier::new(config.classifier.clone()),
            config,
        })
    }

    /// The engine's configuration.
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Build a request from the raw query and a query-understanding payload.
    pub fn request(
        &self,
        query: &str,
        understanding: Option<&str>,
        user_filters: SearchFilters,
        limit: Option<usize>,
    ) -> SearchRequest {
        SearchRequest::from_understanding(
            query,
            understanding,
            user_filters,
            limit,
            &self.config.filters,
        )
    }

    /// Run a search.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let limit = self.resolve_limit(request.limit)?;
        let deadline = started + self.config.search.deadline();

        let decision = self.selector.select(&request.terms, &request.filters);
        let mut filters = request.filters.clone();
        if let Some(strength) = &decision.inferred_strength {
            filters.strength = Some(strength.clone());
        }
        let clause = FilterClause::from_filters(&filters, &self.config.filters)?;

        let mut diagnostics = SearchDiagnostics {
            raw_query: request.query.clone(),
            terms: decision.terms.clone(),
            dropped_terms: decision.dropped.clone(),
            understanding_fallback: request.understanding_fallback,
            corrections: request.corrections.clone(),
            confidence: request.confidence,
            applied_filters: clause.describe(),
            strategy: decision.strategy.label().to_string(),
            ..Default::default()
        };

        log::info!(
            "Searching '{}' with {} strategy ({} terms, {} filters)",
            request.query,
            decision.strategy,
            decision.terms.len(),
            diagnostics.applied_filters.len()
        );

        let candidates = self.config.search.candidate_multiplier.saturating_mul(limit);
        let outcomes: Vec<SubQueryOutcome> = match &decision.strategy {
            SearchStrategy::Empty => {
                return Ok(Self::finish(Vec::new(), 0, diagnostics, started));
            }
            SearchStrategy::SingleTerm { text } => {
                vec![self.term_query(text, &clause, candidates, deadline).await]
            }
            SearchStrategy::MultiTerm => {
                stream::iter(decision.terms.iter())
                    .map(|term| {
                        self.term_query(term, &clause, self.config.search.per_term_limit, deadline)
                    })
                    .buffered(self.config.search.max_concurrency)
                    .collect()
                    .await
            }
            SearchStrategy::FilterOnly => {
                vec![self.structured_query(&clause, candidates, deadline).await]
            }
        };

        let mut working = WorkingSet::new();
        let attempted = outcomes.len();
        let mut last_error = None;
        for (report, result) in outcomes {
            match result {
                Ok(records) => {
                    working.extend(records);
                }
                Err(e) => {
                    log::warn!("Skipping sub-query {}: {e}", report.label);
                    last_error = Some(e);
                }
            }
            diagnostics.sub_queries.push(report);
        }

        let failed = diagnostics.failures().count();
        if failed == attempted {
            let cause = last_error.map(|e| e.to_string()).unwrap_or_default();
            return Err(Error::search_unavailable(format!(
                "all {attempted} primary sub-queries failed: {cause}"
            )));
        }

        let mut raw_record_count = working.len();
        let mut excluded_count = self.exclude(&mut working);

        let matcher = ExactMatcher::new(&decision.terms, filters.ndc.as_deref());
        let semantic = matches!(
            decision.strategy,
            SearchStrategy::SingleTerm { .. } | SearchStrategy::MultiTerm
        );
        if semantic && self.config.expansion.enabled {
            let plan = ExpansionPlan::build(&working, &matcher, &self.config.expansion);
            let summary = self
                .expansion
                .expand(
                    &plan,
                    &clause,
                    limit,
                    deadline,
                    &mut working,
                    &mut diagnostics.sub_queries,
                )
                .await;
            raw_record_count += summary.added_records;
            excluded_count += self.exclude(&mut working);
            diagnostics.expansion = Some(summary);
        }
        diagnostics.raw_record_count = raw_record_count;
        diagnostics.excluded_count = excluded_count;

        let keep_other = decision.strategy == SearchStrategy::FilterOnly;
        let classification =
            self.classifier
                .classify(group(working.into_candidates()), &matcher, keep_other);
        diagnostics.dropped_other_count = classification.dropped_other;

        let total = classification.families.len();
        let families = rank(classification.families, limit);
        Ok(Self::finish(families, total, diagnostics, started))
    }

    /// Drop excluded records; returns how many were removed.
    fn exclude(&self, working: &mut WorkingSet) -> usize {
        working.retain(|c| !self.exclusions.is_excluded(&c.record))
    }

    fn resolve_limit(&self, requested: Option<usize>) -> Result<usize> {
        let limit = requested.unwrap_or(self.config.search.default_limit);
        if limit == 0 {
            return Err(Error::invalid_request("limit must be at least 1"));
        }
        if limit > self.config.search.max_limit {
            return Err(Error::invalid_request(format!(
                "limit {limit} exceeds the maximum of {}",
                self.config.search.max_limit
            )));
        }
        Ok(limit)
    }

    /// Embed one term and run its hybrid query.
    async fn term_query(
        &self,
        text: &str,
        clause: &FilterClause,
        limit: usize,
        deadline: Instant,
    ) -> SubQueryOutcome {
        let started = Instant::now();
        let result = match self.embedder.embed(text, deadline).await {
            Ok(vector) => {
                self.executor
                    .execute(clause, Some(vector), limit, Provenance::Vector, deadline)
                    .await
            }
            Err(e) => Err(e),
        };

        let report = SubQueryReport::from_result(
            format!("term:{text}"),
            SubQueryKind::Hybrid,
            Provenance::Vector,
            started,
            &result,
        );
        (report, result)
    }

    async fn structured_query(
        &self,
        clause: &FilterClause,
        limit: usize,
        deadline: Instant,
    ) -> SubQueryOutcome {
        let started = Instant::now();
        let result = self
            .executor
            .execute(clause, None, limit, Provenance::StructuredFilter, deadline)
            .await;
        let report = SubQueryReport::from_result(
            "structured",
            SubQueryKind::Filter,
            Provenance::StructuredFilter,
            started,
            &result,
        );
        (report, result)
    }

    fn finish(
        families: Vec<DrugFamily>,
        total_families: usize,
        mut diagnostics: SearchDiagnostics,
        started: Instant,
    ) -> SearchResponse {
        diagnostics.total_latency_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "Search '{}' returned {} of {} families in {}ms ({} sub-queries skipped)",
            diagnostics.raw_query,
            families.len(),
            total_families,
            diagnostics.total_latency_ms,
            diagnostics.failures().count()
        );

        SearchResponse {
            message: families.is_empty().then(|| NO_RESULTS_MESSAGE.to_string()),
            families,
            total_families,
            diagnostics,
        }
    }
}

impl std::fmt::Debug for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchEngine")
            .field("embedder", &self.embedder)
            .field("executor", &self.executor)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
