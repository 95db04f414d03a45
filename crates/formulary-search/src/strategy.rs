//! Search strategy selection.
//!
//! A pure function of the request's terms, its filters and the injected
//! [`StrategyConfig`]: terms are cleaned up first, then the remaining term
//! count decides between single-term, multi-term and filter-only search.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::config::StrategyConfig;
use crate::filters::{SearchFilters, is_strength_token, parse_plausible_strength};

/// How a request is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SearchStrategy {
    /// One embedding of the joined terms, one hybrid query.
    SingleTerm {
        /// Text sent to the embedding provider.
        text: String,
    },
    /// One embedding and one query per term, then class expansion.
    MultiTerm,
    /// No terms; structured filters only, no embeddings.
    FilterOnly,
    /// No terms and no filters; nothing to do.
    Empty,
}

impl SearchStrategy {
    /// Short label for logs and diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SingleTerm { .. } => "single_term",
            Self::MultiTerm => "multi_term",
            Self::FilterOnly => "filter_only",
            Self::Empty => "empty",
        }
    }
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The selector's output.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyDecision {
    /// Chosen strategy.
    pub strategy: SearchStrategy,
    /// Terms left after cleanup, in request order.
    pub terms: Vec<String>,
    /// Terms removed by cleanup.
    pub dropped: Vec<String>,
    /// Unit-less strength read from a numeric term, when no strength filter was given.
    pub inferred_strength: Option<String>,
}

/// Chooses a [`SearchStrategy`] from terms and filters.
#[derive(Debug, Clone, Default)]
pub struct StrategySelector {
    config: StrategyConfig,
}

impl StrategySelector {
    /// Create a selector with the given vocabulary and threshold.
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    /// Clean up the terms and pick a strategy.
    pub fn select(&self, terms: &[String], filters: &SearchFilters) -> StrategyDecision {
        let mut kept = Vec::new();
        let mut dropped = Vec::new();
        let mut seen = HashSet::new();
        let mut inferred_strength = None;

        for term in terms {
            let term = term.split_whitespace().collect::<Vec<_>>().join(" ");
            if term.is_empty() {
                continue;
            }
            let lower = term.to_lowercase();
            if !seen.insert(lower.clone()) {
                continue;
            }

            if is_strength_token(&term) {
                if filters.strength.is_none() && inferred_strength.is_none() {
                    inferred_strength = strength_from_token(&term);
                }
                dropped.push(term);
                continue;
            }

            if self.is_noise(&lower) {
                dropped.push(term);
                continue;
            }

            kept.push(term);
        }

        let has_filters = !filters.is_empty() || inferred_strength.is_some();
        let strategy = if kept.len() >= self.config.multi_term_threshold {
            SearchStrategy::MultiTerm
        } else if !kept.is_empty() {
            SearchStrategy::SingleTerm {
                text: kept.join(" "),
            }
        } else if has_filters {
            SearchStrategy::FilterOnly
        } else {
            SearchStrategy::Empty
        };

        log::debug!(
            "Selected {strategy} strategy: kept={kept:?} dropped={dropped:?} inferred_strength={inferred_strength:?}"
        );

        StrategyDecision {
            strategy,
            terms: kept,
            dropped,
            inferred_strength,
        }
    }

    fn is_noise(&self, lower: &str) -> bool {
        lower.chars().count() < self.config.min_term_chars
            || self.config.condition_terms.contains(lower)
            || self.config.dosage_form_terms.contains(lower)
            || self.config.unit_terms.contains(lower)
    }
}

/// A numeric term becomes a strength; bare numbers only within the plausible range.
fn strength_from_token(token: &str) -> Option<String> {
    let trimmed = token.trim();
    if trimmed.chars().all(|c| c.is_ascii_digit() || c == '.') {
        parse_plausible_strength(trimmed).map(|_| trimmed.to_string())
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
