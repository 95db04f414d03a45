//! Grouping of formulation records into drug families.
//!
//! Brands group by brand name and generics by ingredient class, so every
//! strength and package of a product collapses to one row while a brand and
//! its generics stay apart. The key function is total: records missing the
//! usual field fall back to generic name, display name, then identifier.

use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::LazyLock;

use crate::expansion::Candidate;
use crate::types::{DrugFamily, FormulationRecord, MatchType, Provenance};

#[allow(clippy::expect_used)]
static TRAILING_STRENGTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s+\d+(?:\.\d+)?\s*(?:MCG|MG|ML|G|%|UNIT).*$").expect("Invalid regex")
});

// ============================================================================
// Group keys
// ============================================================================

/// Identity of a drug family.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GroupKey {
    /// All formulations of one brand.
    Brand(String),
    /// All generic formulations of one ingredient class.
    Ingredient(String),
}

impl GroupKey {
    /// Compute the key for a record.
    pub fn for_record(record: &FormulationRecord) -> Self {
        if record.is_generic {
            Self::Ingredient(first_non_empty(&[
                record.ingredient_class.as_str(),
                record.generic_name.as_str(),
                record.display_name.as_str(),
                record.id.as_str(),
            ]))
        } else {
            Self::Brand(first_non_empty(&[
                record.brand_name.as_str(),
                record.generic_name.as_str(),
                record.display_name.as_str(),
                record.id.as_str(),
            ]))
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Brand(name) => write!(f, "brand:{name}"),
            Self::Ingredient(class) => write!(f, "ingredient:{class}"),
        }
    }
}

fn first_non_empty(fields: &[&str]) -> String {
    fields
        .iter()
        .map(|f| f.trim())
        .find(|f| !f.is_empty())
        .unwrap_or_default()
        .to_uppercase()
}

/// Strip trailing strength and form text: `ATORVASTATIN 40 MG TABLET` → `ATORVASTATIN`.
pub fn strip_strength(name: &str) -> String {
    let trimmed = name.trim();
    let stripped = TRAILING_STRENGTH.replace(trimmed, "");
    if stripped.trim().is_empty() {
        trimmed.to_string()
    } else {
        stripped.trim().to_string()
    }
}

fn family_display_name(record: &FormulationRecord) -> String {
    if record.is_generic {
        let source = [
            &record.ingredient_class,
            &record.generic_name,
            &record.display_name,
        ]
        .into_iter()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .unwrap_or(record.id.as_str());
        strip_strength(source)
    } else {
        [&record.brand_name, &record.generic_name, &record.display_name]
            .into_iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or(record.id.as_str())
            .to_string()
    }
}

// ============================================================================
// Family groups
// ============================================================================

/// A family before classification.
#[derive(Debug, Clone)]
pub struct FamilyGroup {
    /// Group key.
    pub key: GroupKey,
    /// Display name from the first-seen record.
    pub display_name: String,
    /// Brand name from the first-seen record.
    pub brand_name: String,
    /// Ingredient class from the first-seen record.
    pub ingredient_class: String,
    /// Whether this is a generic family.
    pub is_generic: bool,
    /// Variants in discovery order, unique by identifier.
    pub variants: Vec<Candidate>,
}

impl FamilyGroup {
    fn new(key: GroupKey, first: Candidate) -> Self {
        let record = &first.record;
        Self {
            key,
            display_name: family_display_name(record),
            brand_name: record.brand_name.trim().to_string(),
            ingredient_class: record.ingredient_class.trim().to_string(),
            is_generic: record.is_generic,
            variants: vec![first],
        }
    }

    /// Add a variant; a known identifier only contributes its evidence.
    pub fn merge(&mut self, candidate: Candidate) {
        match self
            .variants
            .iter_mut()
            .find(|v| v.record.id == candidate.record.id)
        {
            Some(existing) => existing.evidence.extend(candidate.evidence),
            None => self.variants.push(candidate),
        }
    }

    /// Union of every variant's evidence.
    pub fn evidence(&self) -> BTreeSet<Provenance> {
        self.variants
            .iter()
            .flat_map(|v| v.evidence.iter().copied())
            .collect()
    }

    /// Best similarity among vector-sourced variants and the variant holding it.
    pub fn best_similarity(&self) -> Option<(f32, &str)> {
        self.variants
            .iter()
            .filter(|v| v.record.provenance == Provenance::Vector)
            .filter_map(|v| v.record.similarity.map(|s| (s, v.record.id.as_str())))
            .fold(None, |best, (score, id)| match best {
                Some((top, _)) if top >= score => best,
                _ => Some((score, id)),
            })
    }

    /// Finish the family with its classification.
    pub fn into_family(self, match_type: MatchType, match_reason: String) -> DrugFamily {
        let best = self.best_similarity().map(|(s, id)| (s, id.to_string()));
        let provenance = self.evidence();
        let dosage_forms: BTreeSet<String> = self
            .variants
            .iter()
            .map(|v| v.record.dosage_form.trim().to_uppercase())
            .filter(|f| !f.is_empty())
            .collect();

        let primary_id = match &best {
            Some((_, id)) => id.clone(),
            None => self
                .variants
                .first()
                .map(|v| v.record.id.clone())
                .unwrap_or_default(),
        };

        DrugFamily {
            group_key: self.key.to_string(),
            display_name: self.display_name,
            brand_name: self.brand_name,
            ingredient_class: self.ingredient_class,
            is_generic: self.is_generic,
            match_type,
            match_reason,
            best_similarity: best.map(|(s, _)| s),
            primary_id,
            dosage_forms: dosage_forms.into_iter().collect(),
            provenance,
            variants: self.variants.into_iter().map(|v| v.record).collect(),
        }
    }
}

/// Group candidates into families, in order of each family's first record.
pub fn group(candidates: impl IntoIterator<Item = Candidate>) -> Vec<FamilyGroup> {
    let mut groups: Vec<FamilyGroup> = Vec::new();
    let mut positions: HashMap<GroupKey, usize> = HashMap::new();

    for candidate in candidates {
        let key = GroupKey::for_record(&candidate.record);
        match positions.get(&key) {
            Some(&pos) => groups[pos].merge(candidate),
            None => {
                positions.insert(key.clone(), groups.len());
                groups.push(FamilyGroup::new(key, candidate));
            }
        }
    }

    groups
}

// ============================================================================
// Tests
// ============================================================================
