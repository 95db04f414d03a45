//! Per-request diagnostics.
//!
//! Informational only: nothing here feeds back into ranking. Partial
//! failures (a term that could not be embedded, an expansion query that
//! timed out) surface here and nowhere else.

use formulary_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::time::Instant;

use crate::types::{FormulationRecord, Provenance};

/// What a sub-query did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubQueryKind {
    /// Embedding plus filter-and-vector query for one term.
    Hybrid,
    /// Filter-only query.
    Filter,
}

/// Outcome of one embedding or index round-trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQueryReport {
    /// `term:<text>`, `ingredient:<class>`, `therapeutic:<class>` or `structured`.
    pub label: String,
    /// Query shape.
    pub kind: SubQueryKind,
    /// Provenance stamped on the returned records.
    pub provenance: Provenance,
    /// Wall time in milliseconds.
    pub latency_ms: u64,
    /// Records returned (zero on failure).
    pub record_count: usize,
    /// Error message when the sub-query was skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubQueryReport {
    /// Build a report from a finished sub-query.
    pub fn from_result(
        label: impl Into<String>,
        kind: SubQueryKind,
        provenance: Provenance,
        started: Instant,
        result: &Result<Vec<FormulationRecord>>,
    ) -> Self {
        let (record_count, error) = match result {
            Ok(records) => (records.len(), None),
            Err(e) => (0, Some(e.to_string())),
        };

        Self {
            label: label.into(),
            kind,
            provenance,
            latency_ms: started.elapsed().as_millis() as u64,
            record_count,
            error,
        }
    }

    /// Whether the sub-query failed and was skipped.
    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Class keys considered for expansion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExpansionSummary {
    /// Ingredient classes queried.
    pub ingredient_classes: Vec<String>,
    /// Therapeutic classes queried.
    pub therapeutic_classes: Vec<String>,
    /// Therapeutic classes on the deny list, not queried.
    pub denied: Vec<String>,
    /// Records that were new to the working set.
    pub added_records: usize,
}

/// Diagnostics block returned with every response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchDiagnostics {
    /// Raw query text.
    pub raw_query: String,
    /// Terms used after cleanup.
    pub terms: Vec<String>,
    /// Terms removed by cleanup.
    pub dropped_terms: Vec<String>,
    /// Whether query understanding failed and the raw text was used.
    pub understanding_fallback: bool,
    /// Spelling corrections from query understanding.
    pub corrections: Vec<String>,
    /// Confidence from query understanding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    /// Filter clause applied to every primary and expansion query.
    pub applied_filters: BTreeMap<String, String>,
    /// Selected strategy label.
    pub strategy: String,
    /// Embedding and index sub-queries, in issue order.
    pub sub_queries: Vec<SubQueryReport>,
    /// Expansion keys, when expansion ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansion: Option<ExpansionSummary>,
    /// Distinct records collected before exclusions.
    pub raw_record_count: usize,
    /// Records removed by exclusion patterns.
    pub excluded_count: usize,
    /// Families classified `other` and dropped.
    pub dropped_other_count: usize,
    /// Total request latency in milliseconds.
    pub total_latency_ms: u64,
}

impl SearchDiagnostics {
    /// Sub-queries that failed and were skipped.
    pub fn failures(&self) -> impl Iterator<Item = &SubQueryReport> {
        self.sub_queries.iter().filter(|r| r.is_failure())
    }
}

// ============================================================================
// Tests
// ============================================================================
