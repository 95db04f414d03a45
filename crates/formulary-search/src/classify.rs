//! Match classification.
//!
//! Every variant earns a badge from its names, its ingredient class and its
//! evidence; a family takes the strongest badge of its variants. None of the
//! rules look at what is absent, so adding variants or evidence can only
//! raise a family's badge.

use std::collections::BTreeSet;

use crate::config::ClassifierPolicy;
use crate::expansion::Candidate;
use crate::filters::normalize_id;
use crate::grouping::FamilyGroup;
use crate::types::{DrugFamily, FormulationRecord, MatchType, Provenance};

// ============================================================================
// Exact matching
// ============================================================================

/// Decides whether a record is an exact match for the request.
#[derive(Debug, Clone, Default)]
pub struct ExactMatcher {
    terms: Vec<String>,
    requested_id: Option<String>,
}

impl ExactMatcher {
    /// Match against search terms (case-insensitive) and an optional requested identifier.
    pub fn new(terms: &[String], requested_id: Option<&str>) -> Self {
        Self {
            terms: terms
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            requested_id: requested_id.map(normalize_id).filter(|id| !id.is_empty()),
        }
    }

    /// The reason a record is exact, or `None`.
    pub fn reason(&self, record: &FormulationRecord) -> Option<String> {
        if let Some(id) = &self.requested_id {
            if normalize_id(&record.id) == *id {
                return Some("Matches requested NDC".to_string());
            }
        }

        let corpus = record.match_corpus();
        self.terms
            .iter()
            .find(|term| corpus.iter().any(|name| name.contains(term.as_str())))
            .map(|term| format!("Name contains \"{term}\""))
    }
}

// ============================================================================
// Classifier
// ============================================================================

/// Result of classifying a request's families.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Kept families, in grouping order.
    pub families: Vec<DrugFamily>,
    /// Families classified `other` and dropped.
    pub dropped_other: usize,
}

/// Assigns match types to families.
#[derive(Debug, Clone, Default)]
pub struct MatchClassifier {
    policy: ClassifierPolicy,
}

impl MatchClassifier {
    /// Create a classifier with the given policy.
    pub fn new(policy: ClassifierPolicy) -> Self {
        Self { policy }
    }

    /// Classify every group. `keep_other` keeps `other` families regardless of policy.
    pub fn classify(
        &self,
        groups: Vec<FamilyGroup>,
        matcher: &ExactMatcher,
        keep_other: bool,
    ) -> Classification {
        let exact_flags: Vec<bool> = groups
            .iter()
            .map(|g| g.variants.iter().any(|v| matcher.reason(&v.record).is_some()))
            .collect();

        let exact_ingredients: BTreeSet<String> = groups
            .iter()
            .zip(&exact_flags)
            .filter(|(_, exact)| **exact)
            .flat_map(|(g, _)| g.variants.iter())
            .map(|v| class_key(&v.record.ingredient_class))
            .filter(|c| !c.is_empty())
            .collect();

        let keep_other = keep_other || self.policy.include_other;
        let mut result = Classification::default();

        for group in groups {
            let (match_type, reason) = group
                .variants
                .iter()
                .map(|v| badge(v, matcher, &exact_ingredients))
                .fold(None, |best: Option<(MatchType, String)>, (badge, reason)| match best {
                    Some((top, _)) if top.strongest(badge) == top => best,
                    _ => Some((badge, reason)),
                })
                .unwrap_or((MatchType::Other, String::new()));

            if match_type == MatchType::Other && !keep_other {
                log::debug!("Dropping unmatched family {}", group.key);
                result.dropped_other += 1;
                continue;
            }

            result
                .families
                .push(group.into_family(match_type, reason));
        }

        result
    }
}

fn class_key(class: &str) -> String {
    class.trim().to_uppercase()
}

/// Badge and reason for one variant.
fn badge(
    variant: &Candidate,
    matcher: &ExactMatcher,
    exact_ingredients: &BTreeSet<String>,
) -> (MatchType, String) {
    if let Some(reason) = matcher.reason(&variant.record) {
        return (MatchType::Exact, reason);
    }

    if exact_ingredients.contains(&class_key(&variant.record.ingredient_class)) {
        return (
            MatchType::PharmacologicEquivalent,
            "Same active ingredient as an exact match".to_string(),
        );
    }

    if variant
        .evidence
        .contains(&Provenance::TherapeuticClassFilter)
    {
        return (
            MatchType::TherapeuticAlternative,
            "Same therapeutic class as an exact match".to_string(),
        );
    }

    let reason = if variant.evidence.contains(&Provenance::Vector) {
        "Semantic similarity match"
    } else if variant.evidence.contains(&Provenance::StructuredFilter) {
        "Matches structured filters"
    } else {
        "Related by class expansion"
    };
    (MatchType::Other, reason.to_string())
}

// ============================================================================
// Tests
// ============================================================================
