//! Class expansion.
//!
//! Exact matches found by vector search pull in the rest of their
//! ingredient class and therapeutic class through filter-only queries.
//! Keys are collected first and each is queried once, so the number of
//! expansion round-trips never depends on how many hits share a class.

use futures::stream::{self, StreamExt};
use std::collections::{BTreeSet, HashMap};
use tokio::time::Instant;

use crate::classify::ExactMatcher;
use crate::config::ExpansionConfig;
use crate::diagnostics::{ExpansionSummary, SubQueryKind, SubQueryReport};
use crate::executor::HybridExecutor;
use crate::filters::FilterClause;
use crate::types::{FormulationRecord, Provenance};

// ============================================================================
// Working set
// ============================================================================

/// A record and every provenance tag it was seen with.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The first copy of the record to arrive.
    pub record: FormulationRecord,
    /// All provenance tags, including the record's own.
    pub evidence: BTreeSet<Provenance>,
}

impl Candidate {
    /// Wrap a record, seeding the evidence with its provenance.
    pub fn new(record: FormulationRecord) -> Self {
        let evidence = BTreeSet::from([record.provenance]);
        Self { record, evidence }
    }

    /// Whether the record was returned by a vector query.
    pub fn is_vector_sourced(&self) -> bool {
        self.evidence.contains(&Provenance::Vector)
    }
}

/// Request-scoped records, unique by identifier, in discovery order.
///
/// The first writer for an identifier keeps its record, score and
/// provenance; later copies only add their provenance to the evidence.
#[derive(Debug, Clone, Default)]
pub struct WorkingSet {
    candidates: Vec<Candidate>,
    positions: HashMap<String, usize>,
}

impl WorkingSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a record. Returns `true` if its identifier was new.
    pub fn insert(&mut self, record: FormulationRecord) -> bool {
        if let Some(&pos) = self.positions.get(&record.id) {
            self.candidates[pos].evidence.insert(record.provenance);
            return false;
        }
        self.positions
            .insert(record.id.clone(), self.candidates.len());
        self.candidates.push(Candidate::new(record));
        true
    }

    /// Merge many records; returns how many were new.
    pub fn extend(&mut self, records: impl IntoIterator<Item = FormulationRecord>) -> usize {
        records
            .into_iter()
            .map(|r| self.insert(r))
            .filter(|added| *added)
            .count()
    }

    /// Keep only candidates matching the predicate; returns how many were removed.
    pub fn retain(&mut self, mut keep: impl FnMut(&Candidate) -> bool) -> usize {
        let before = self.candidates.len();
        self.candidates.retain(|c| keep(c));
        self.positions = self
            .candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (c.record.id.clone(), i))
            .collect();
        before - self.candidates.len()
    }

    /// Number of distinct records.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Candidates in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    /// Look up a candidate by identifier.
    pub fn get(&self, id: &str) -> Option<&Candidate> {
        self.positions.get(id).map(|&pos| &self.candidates[pos])
    }

    /// Consume the set.
    pub fn into_candidates(self) -> Vec<Candidate> {
        self.candidates
    }
}

// ============================================================================
// Expansion plan
// ============================================================================

/// Distinct class keys to expand, collected from exact matches only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionPlan {
    /// Ingredient classes to query.
    pub ingredient_classes: BTreeSet<String>,
    /// Therapeutic classes to query.
    pub therapeutic_classes: BTreeSet<String>,
    /// Therapeutic classes skipped because they are on the deny list.
    pub denied: BTreeSet<String>,
}

impl ExpansionPlan {
    /// Collect keys from the vector-sourced exact matches in the working set.
    pub fn build(working: &WorkingSet, matcher: &ExactMatcher, config: &ExpansionConfig) -> Self {
        let denylist: BTreeSet<String> = config
            .therapeutic_class_denylist
            .iter()
            .map(|c| c.trim().to_uppercase())
            .collect();

        let mut plan = Self::default();
        for candidate in working.iter().filter(|c| c.is_vector_sourced()) {
            if matcher.reason(&candidate.record).is_none() {
                continue;
            }

            let ingredient = candidate.record.ingredient_class.trim().to_uppercase();
            if !ingredient.is_empty() {
                plan.ingredient_classes.insert(ingredient);
            }

            let therapeutic = candidate.record.therapeutic_class.trim().to_uppercase();
            if therapeutic.is_empty() {
                continue;
            }
            if denylist.contains(&therapeutic) {
                plan.denied.insert(therapeutic);
            } else {
                plan.therapeutic_classes.insert(therapeutic);
            }
        }
        plan
    }

    /// Whether there is nothing to query.
    pub fn is_empty(&self) -> bool {
        self.ingredient_classes.is_empty() && self.therapeutic_classes.is_empty()
    }

    /// Queries in merge order: ingredient classes, then therapeutic classes.
    fn queries(&self) -> Vec<(Provenance, String)> {
        self.ingredient_classes
            .iter()
            .map(|c| (Provenance::IngredientClassFilter, c.clone()))
            .chain(
                self.therapeutic_classes
                    .iter()
                    .map(|c| (Provenance::TherapeuticClassFilter, c.clone())),
            )
            .collect()
    }
}

// ============================================================================
// Controller
// ============================================================================

/// Runs an [`ExpansionPlan`] and merges the results.
#[derive(Debug, Clone)]
pub struct ExpansionController {
    executor: HybridExecutor,
    max_concurrency: usize,
}

impl ExpansionController {
    /// Create a controller running at most `max_concurrency` queries at once.
    pub fn new(executor: HybridExecutor, max_concurrency: usize) -> Self {
        Self {
            executor,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Run every planned query and merge the results into `working`.
    ///
    /// Each query ANDs `base` with its class constraint and is bounded by
    /// `limit`. Failed queries are skipped and reported.
    pub async fn expand(
        &self,
        plan: &ExpansionPlan,
        base: &FilterClause,
        limit: usize,
        deadline: Instant,
        working: &mut WorkingSet,
        reports: &mut Vec<SubQueryReport>,
    ) -> ExpansionSummary {
        let outcomes: Vec<_> = stream::iter(plan.queries())
            .map(|(provenance, class)| async move {
                let (label, filter) = match provenance {
                    Provenance::IngredientClassFilter => (
                        format!("ingredient:{class}"),
                        base.clone().with_ingredient_class(&class),
                    ),
                    _ => (
                        format!("therapeutic:{class}"),
                        base.clone().with_therapeutic_class(&class),
                    ),
                };

                let started = Instant::now();
                let result = self
                    .executor
                    .execute(&filter, None, limit, provenance, deadline)
                    .await;
                let report = SubQueryReport::from_result(
                    label,
                    SubQueryKind::Filter,
                    provenance,
                    started,
                    &result,
                );
                (report, result)
            })
            .buffered(self.max_concurrency)
            .collect()
            .await;

        let mut added_records = 0;
        for (report, result) in outcomes {
            match result {
                Ok(records) => added_records += working.extend(records),
                Err(e) => log::warn!("Skipping expansion query {}: {e}", report.label),
            }
            reports.push(report);
        }

        log::debug!(
            "Expansion queried {} ingredient and {} therapeutic classes, added {added_records} records",
            plan.ingredient_classes.len(),
            plan.therapeutic_classes.len()
        );

        ExpansionSummary {
            ingredient_classes: plan.ingredient_classes.iter().cloned().collect(),
            therapeutic_classes: plan.therapeutic_classes.iter().cloned().collect(),
            denied: plan.denied.iter().cloned().collect(),
            added_records,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
