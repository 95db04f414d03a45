//! Common types for the search engine.
//!
//! Everything here is request-scoped: records come back from the index,
//! get grouped into families, and are discarded once the response is
//! serialized.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::filters::SearchFilters;

// ============================================================================
// Provenance
// ============================================================================

/// Which search phase discovered a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Nearest-neighbour hit for a search term.
    Vector,
    /// Filter-only expansion on an exact match's ingredient class.
    IngredientClassFilter,
    /// Filter-only expansion on an exact match's therapeutic class.
    TherapeuticClassFilter,
    /// Filter-only search with no terms at all.
    StructuredFilter,
}

impl Provenance {
    /// Stable label used in logs and diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::IngredientClassFilter => "ingredient_class_filter",
            Self::TherapeuticClassFilter => "therapeutic_class_filter",
            Self::StructuredFilter => "structured_filter",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Formulation records
// ============================================================================

/// One distinct packaged product as stored in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulationRecord {
    /// Stable identifier (NDC-equivalent), unique within the index.
    pub id: String,

    /// Display name, usually including strength and form.
    pub display_name: String,

    /// Brand name; empty for pure generics.
    #[serde(default)]
    pub brand_name: String,

    /// Generic name.
    #[serde(default)]
    pub generic_name: String,

    /// Active-ingredient class key.
    #[serde(default)]
    pub ingredient_class: String,

    /// Therapeutic class key.
    #[serde(default)]
    pub therapeutic_class: String,

    /// Whether this is a generic product.
    #[serde(default = "default_true")]
    pub is_generic: bool,

    /// Dosage form, e.g. `TABLET`.
    #[serde(default)]
    pub dosage_form: String,

    /// Strength, e.g. `10 MG`.
    #[serde(default)]
    pub strength: String,

    /// Manufacturer name.
    #[serde(default)]
    pub manufacturer: String,

    /// DEA schedule, when controlled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dea_schedule: Option<String>,

    /// Similarity in `[0, 1]`; only present for vector hits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,

    /// How this record was found.
    #[serde(default = "default_provenance")]
    pub provenance: Provenance,
}

fn default_true() -> bool {
    true
}

fn default_provenance() -> Provenance {
    Provenance::StructuredFilter
}

impl FormulationRecord {
    /// Create a generic record with only an identifier and display name.
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            brand_name: String::new(),
            generic_name: String::new(),
            ingredient_class: String::new(),
            therapeutic_class: String::new(),
            is_generic: true,
            dosage_form: String::new(),
            strength: String::new(),
            manufacturer: String::new(),
            dea_schedule: None,
            similarity: None,
            provenance: Provenance::StructuredFilter,
        }
    }

    /// Mark as a branded product with the given brand name.
    pub fn with_brand(mut self, brand_name: impl Into<String>) -> Self {
        self.brand_name = brand_name.into();
        self.is_generic = false;
        self
    }

    /// Set the generic name.
    pub fn with_generic_name(mut self, generic_name: impl Into<String>) -> Self {
        self.generic_name = generic_name.into();
        self
    }

    /// Set the ingredient and therapeutic class keys.
    pub fn with_classes(
        mut self,
        ingredient_class: impl Into<String>,
        therapeutic_class: impl Into<String>,
    ) -> Self {
        self.ingredient_class = ingredient_class.into();
        self.therapeutic_class = therapeutic_class.into();
        self
    }

    /// Set dosage form and strength.
    pub fn with_form(mut self, dosage_form: impl Into<String>, strength: impl Into<String>) -> Self {
        self.dosage_form = dosage_form.into();
        self.strength = strength.into();
        self
    }

    /// Set the manufacturer.
    pub fn with_manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    /// Set the DEA schedule.
    pub fn with_dea_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.dea_schedule = Some(schedule.into());
        self
    }

    /// Set provenance and similarity together.
    pub fn found_by(mut self, provenance: Provenance, similarity: Option<f32>) -> Self {
        self.provenance = provenance;
        self.similarity = similarity;
        self
    }

    /// Lower-cased names a search term is matched against.
    pub fn match_corpus(&self) -> [String; 3] {
        [
            self.display_name.to_lowercase(),
            self.brand_name.to_lowercase(),
            self.generic_name.to_lowercase(),
        ]
    }
}

// ============================================================================
// Match classification
// ============================================================================

/// Why a family appears in the results, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// A variant's name contains a search term.
    Exact,
    /// Same active ingredient as an exact match.
    PharmacologicEquivalent,
    /// Same therapeutic class as an exact match, reached only by expansion.
    TherapeuticAlternative,
    /// None of the above.
    Other,
}

impl MatchType {
    /// Sort priority; lower ranks first.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Exact => 0,
            Self::PharmacologicEquivalent => 1,
            Self::TherapeuticAlternative => 2,
            Self::Other => 3,
        }
    }

    /// The stronger of two badges.
    pub fn strongest(self, other: Self) -> Self {
        if other.priority() < self.priority() {
            other
        } else {
            self
        }
    }
}

// ============================================================================
// Families
// ============================================================================

/// A deduplicated brand or generic grouping of formulations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugFamily {
    /// `brand:<BRAND>` or `ingredient:<INGREDIENT CLASS>`.
    pub group_key: String,

    /// Family display name.
    pub display_name: String,

    /// Brand name of the first-seen record (empty for generic families).
    pub brand_name: String,

    /// Ingredient class of the first-seen record.
    pub ingredient_class: String,

    /// Whether this is a generic family.
    pub is_generic: bool,

    /// Classification badge.
    pub match_type: MatchType,

    /// Human-readable explanation of the badge.
    pub match_reason: String,

    /// Best similarity among vector-sourced variants.
    pub best_similarity: Option<f32>,

    /// Variant carrying the best similarity, else the first variant.
    pub primary_id: String,

    /// Distinct dosage forms, sorted.
    pub dosage_forms: Vec<String>,

    /// Union of every provenance tag seen on the family's variants.
    pub provenance: BTreeSet<Provenance>,

    /// Variants in discovery order, unique by identifier.
    pub variants: Vec<FormulationRecord>,
}

/// Variants of one family made by the same manufacturer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManufacturerGroup {
    /// Manufacturer name.
    pub manufacturer: String,
    /// Identifiers of that manufacturer's variants.
    pub variant_ids: Vec<String>,
}

impl DrugFamily {
    /// Variants grouped by manufacturer, sorted by manufacturer name.
    ///
    /// Variants with no manufacturer are listed under `Unknown Manufacturer`.
    pub fn manufacturer_groups(&self) -> Vec<ManufacturerGroup> {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for variant in &self.variants {
            let name = variant.manufacturer.trim();
            let name = if name.is_empty() {
                "Unknown Manufacturer"
            } else {
                name
            };
            groups
                .entry(name.to_string())
                .or_default()
                .push(variant.id.clone());
        }

        groups
            .into_iter()
            .map(|(manufacturer, variant_ids)| ManufacturerGroup {
                manufacturer,
                variant_ids,
            })
            .collect()
    }

    /// Whether the family contains a variant with this identifier.
    pub fn contains(&self, id: &str) -> bool {
        self.variants.iter().any(|v| v.id == id)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A search request after query understanding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// The raw user query.
    pub query: String,

    /// Ordered search terms.
    #[serde(default)]
    pub terms: Vec<String>,

    /// Structured filters to apply.
    #[serde(default)]
    pub filters: SearchFilters,

    /// Maximum families to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,

    /// Spelling corrections reported by query understanding.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub corrections: Vec<String>,

    /// Query-understanding confidence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,

    /// Whether query understanding failed and the raw text was used as the term.
    #[serde(default)]
    pub understanding_fallback: bool,
}

impl SearchRequest {
    /// Create a request whose terms are given directly.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    /// Set the search terms.
    pub fn with_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terms = terms.into_iter().map(Into::into).collect();
        self
    }

    /// Set the filters.
    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    /// Set the result limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_match_type_priority_order() {
        assert!(MatchType::Exact.priority() < MatchType::PharmacologicEquivalent.priority());
        assert!(
            MatchType::PharmacologicEquivalent.priority()
                < MatchType::TherapeuticAlternative.priority()
        );
        assert!(MatchType::TherapeuticAlternative.priority() < MatchType::Other.priority());
    }

    #[test]
    fn test_match_type_strongest() {
        assert_eq!(
            MatchType::Other.strongest(MatchType::Exact),
            MatchType::Exact
        );
        assert_eq!(
            MatchType::Exact.strongest(MatchType::TherapeuticAlternative),
            MatchType::Exact
        );
        assert_eq!(
            MatchType::TherapeuticAlternative.strongest(MatchType::PharmacologicEquivalent),
            MatchType::PharmacologicEquivalent
        );
    }

    #[test]
    fn test_record_builder() {
        let record = FormulationRecord::new("00310-0751-90", "CRESTOR 10 MG TABLET")
            .with_brand("CRESTOR")
            .with_generic_name("rosuvastatin calcium")
            .with_classes("ROSUVASTATIN CALCIUM", "HMG-COA REDUCTASE INHIBITORS")
            .with_form("TABLET", "10 MG")
            .with_manufacturer("AstraZeneca")
            .found_by(Provenance::Vector, Some(0.93));

        assert!(!record.is_generic);
        assert_eq!(record.brand_name, "CRESTOR");
        assert_eq!(record.similarity, Some(0.93));
        assert_eq!(record.provenance, Provenance::Vector);
        assert_eq!(record.match_corpus()[1], "crestor");
    }

    #[test]
    fn test_record_deserialization_defaults() {
        let json = r#"{"id": "1", "display_name": "SIMVASTATIN 20 MG TABLET"}"#;
        let record: FormulationRecord = serde_json::from_str(json).unwrap();
        assert!(record.is_generic);
        assert!(record.similarity.is_none());
        assert_eq!(record.provenance, Provenance::StructuredFilter);
    }

    #[test]
    fn test_provenance_serialization() {
        let json = serde_json::to_string(&Provenance::TherapeuticClassFilter).unwrap();
        assert_eq!(json, "\"therapeutic_class_filter\"");
        assert_eq!(Provenance::Vector.to_string(), "vector");
    }

    #[test]
    fn test_manufacturer_groups() {
        let family = DrugFamily {
            group_key: "ingredient:ROSUVASTATIN CALCIUM".to_string(),
            display_name: "ROSUVASTATIN CALCIUM".to_string(),
            brand_name: String::new(),
            ingredient_class: "ROSUVASTATIN CALCIUM".to_string(),
            is_generic: true,
            match_type: MatchType::PharmacologicEquivalent,
            match_reason: String::new(),
            best_similarity: None,
            primary_id: "a".to_string(),
            dosage_forms: vec!["TABLET".to_string()],
            provenance: BTreeSet::new(),
            variants: vec![
                FormulationRecord::new("a", "A").with_manufacturer("Teva"),
                FormulationRecord::new("b", "B").with_manufacturer("Aurobindo"),
                FormulationRecord::new("c", "C").with_manufacturer("Teva"),
                FormulationRecord::new("d", "D"),
            ],
        };

        let groups = family.manufacturer_groups();
        let names: Vec<&str> = groups.iter().map(|g| g.manufacturer.as_str()).collect();
        assert_eq!(names, vec!["Aurobindo", "Teva", "Unknown Manufacturer"]);
        assert_eq!(groups[1].variant_ids, vec!["a", "c"]);
        assert!(family.contains("d"));
        assert!(!family.contains("z"));
    }

    #[test]
    fn test_request_builder() {
        let request = SearchRequest::new("statins")
            .with_terms(["atorvastatin", "rosuvastatin"])
            .with_limit(5);
        assert_eq!(request.terms.len(), 2);
        assert_eq!(request.limit, Some(5));
        assert!(!request.understanding_fallback);
    }
}
