//! Structured filters and the filter clause evaluated by the index.
//!
//! [`SearchFilters`] is what a caller (or query understanding) asks for;
//! [`FilterClause`] is the normalized, AND-ed constraint set sent with every
//! index query. Expansion queries add class constraints on top of the
//! request's clause.

use formulary_core::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use crate::config::{ExclusionConfig, FilterConfig};
use crate::types::FormulationRecord;

// ============================================================================
// Regex patterns
// ============================================================================

#[allow(clippy::expect_used)]
static STRENGTH_WITH_UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(mcg|mg|ml|g|%|units?)").expect("Invalid regex")
});

#[allow(clippy::expect_used)]
static STRENGTH_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\d+(?:\.\d+)?\s*(mcg|mg|ml|g|%|units?)?$").expect("Invalid regex")
});

/// Smallest and largest unit-less number read as a strength.
const STRENGTH_RANGE: (f64, f64) = (0.001, 10_000.0);

// ============================================================================
// Filter keys
// ============================================================================

/// The structured filters a request may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKey {
    /// Dosage form, e.g. `TABLET`.
    DosageForm,
    /// Strength, e.g. `10 MG`.
    Strength,
    /// Generic or brand.
    IsGeneric,
    /// Product identifier.
    Ndc,
    /// DEA schedule.
    DeaSchedule,
}

impl FilterKey {
    /// Field name as it appears in payloads and diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DosageForm => "dosage_form",
            Self::Strength => "strength",
            Self::IsGeneric => "is_generic",
            Self::Ndc => "ndc",
            Self::DeaSchedule => "dea_schedule",
        }
    }
}

// ============================================================================
// Search filters
// ============================================================================

/// Structured filters, each absent or a single value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Dosage form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dosage_form: Option<String>,

    /// Strength.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strength: Option<String>,

    /// Generic (`true`) or brand (`false`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_generic: Option<bool>,

    /// Product identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ndc: Option<String>,

    /// DEA schedule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dea_schedule: Option<String>,
}

impl SearchFilters {
    /// Whether no filter is set.
    pub fn is_empty(&self) -> bool {
        self.dosage_form.is_none()
            && self.strength.is_none()
            && self.is_generic.is_none()
            && self.ndc.is_none()
            && self.dea_schedule.is_none()
    }

    /// Combine caller filters with filters extracted by query understanding.
    ///
    /// Understood filters are only taken for keys in `auto_apply`; caller
    /// filters always apply and win on conflict.
    pub fn merge(user: &Self, understood: &Self, auto_apply: &BTreeSet<FilterKey>) -> Self {
        let take = |key: FilterKey| auto_apply.contains(&key);

        Self {
            dosage_form: user.dosage_form.clone().or_else(|| {
                take(FilterKey::DosageForm)
                    .then(|| understood.dosage_form.clone())
                    .flatten()
            }),
            strength: user.strength.clone().or_else(|| {
                take(FilterKey::Strength)
                    .then(|| understood.strength.clone())
                    .flatten()
            }),
            is_generic: user
                .is_generic
                .or_else(|| take(FilterKey::IsGeneric).then_some(understood.is_generic).flatten()),
            ndc: user.ndc.clone().or_else(|| {
                take(FilterKey::Ndc)
                    .then(|| understood.ndc.clone())
                    .flatten()
            }),
            dea_schedule: user.dea_schedule.clone().or_else(|| {
                take(FilterKey::DeaSchedule)
                    .then(|| understood.dea_schedule.clone())
                    .flatten()
            }),
        }
    }

    /// The requested product identifier with dashes removed.
    pub fn normalized_ndc(&self) -> Option<String> {
        self.ndc
            .as_deref()
            .map(normalize_id)
            .filter(|id| !id.is_empty())
    }
}

/// Upper-case, trim, and replace inner whitespace with `_`.
pub fn normalize_form(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_uppercase()
}

/// Strip dashes and surrounding whitespace from a product identifier.
pub fn normalize_id(value: &str) -> String {
    value.trim().replace('-', "")
}

fn normalize_class(value: &str) -> String {
    value.trim().to_uppercase()
}

// ============================================================================
// Strength matching
// ============================================================================

/// Matches a requested strength against record text.
///
/// `10mg` matches `10 MG` but not `110 MG` or `10.5 MG`; a unit-less `12.5`
/// matches `12.5` followed by any unit.
#[derive(Debug, Clone)]
pub struct StrengthMatcher {
    requested: String,
    pattern: Regex,
}

impl StrengthMatcher {
    /// Build a matcher from a strength filter value.
    ///
    /// Returns `None` for a blank value. Values that are neither a number with
    /// a unit nor a plausible bare number match as a literal substring.
    pub fn parse(value: &str) -> Result<Option<Self>> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }

        let source = if let Some(caps) = STRENGTH_WITH_UNIT.captures(trimmed) {
            let number = regex::escape(&caps[1]);
            let unit = canonical_unit(&caps[2]);
            format!(r"(?i)(?:^|[^0-9.]){number}\s*{}", regex::escape(unit))
        } else if parse_plausible_strength(trimmed).is_some() {
            format!(r"(?i)(?:^|[^0-9.]){}\s*[A-Z%]", regex::escape(trimmed))
        } else {
            format!("(?i){}", regex::escape(trimmed))
        };

        let pattern = Regex::new(&source)
            .map_err(|e| Error::invalid_request(format!("strength filter '{trimmed}': {e}")))?;

        Ok(Some(Self {
            requested: trimmed.to_string(),
            pattern,
        }))
    }

    /// Whether the text contains the requested strength.
    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    /// The strength as requested.
    pub fn requested(&self) -> &str {
        &self.requested
    }
}

fn canonical_unit(unit: &str) -> &'static str {
    match unit.to_ascii_lowercase().as_str() {
        "mcg" => "MCG",
        "mg" => "MG",
        "ml" => "ML",
        "g" => "G",
        "%" => "%",
        _ => "UNIT",
    }
}

/// Parse a bare number in the range accepted as a strength.
pub fn parse_plausible_strength(token: &str) -> Option<f64> {
    let value: f64 = token.trim().parse().ok()?;
    (value.is_finite() && value >= STRENGTH_RANGE.0 && value <= STRENGTH_RANGE.1).then_some(value)
}

/// Whether a search term is only a strength (`10`, `10mg`, `0.1 %`).
pub fn is_strength_token(token: &str) -> bool {
    STRENGTH_TOKEN.is_match(token.trim())
}

// ============================================================================
// Filter clause
// ============================================================================

/// One AND-ed constraint.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// Normalized dosage form is one of these.
    DosageForm(BTreeSet<String>),
    /// Generic flag equals.
    Generic(bool),
    /// Identifier equals, dashes ignored.
    Id(String),
    /// DEA schedule equals, case-insensitive.
    DeaSchedule(String),
    /// Strength or display name contains the strength.
    Strength(StrengthMatcher),
    /// Ingredient class equals, case-insensitive.
    IngredientClass(String),
    /// Therapeutic class equals, case-insensitive.
    TherapeuticClass(String),
}

impl Constraint {
    fn matches(&self, record: &FormulationRecord) -> bool {
        match self {
            Self::DosageForm(forms) => forms.contains(&normalize_form(&record.dosage_form)),
            Self::Generic(flag) => record.is_generic == *flag,
            Self::Id(id) => normalize_id(&record.id) == *id,
            Self::DeaSchedule(schedule) => record
                .dea_schedule
                .as_deref()
                .is_some_and(|s| s.trim().eq_ignore_ascii_case(schedule)),
            Self::Strength(matcher) => {
                matcher.is_match(&record.strength) || matcher.is_match(&record.display_name)
            }
            Self::IngredientClass(class) => normalize_class(&record.ingredient_class) == *class,
            Self::TherapeuticClass(class) => normalize_class(&record.therapeutic_class) == *class,
        }
    }

    fn describe(&self) -> (&'static str, String) {
        match self {
            Self::DosageForm(forms) => (
                "dosage_form",
                forms.iter().cloned().collect::<Vec<_>>().join("|"),
            ),
            Self::Generic(flag) => ("is_generic", flag.to_string()),
            Self::Id(id) => ("ndc", id.clone()),
            Self::DeaSchedule(schedule) => ("dea_schedule", schedule.clone()),
            Self::Strength(matcher) => ("strength", matcher.requested().to_string()),
            Self::IngredientClass(class) => ("ingredient_class", class.clone()),
            Self::TherapeuticClass(class) => ("therapeutic_class", class.clone()),
        }
    }
}

/// Logical AND of constraints; the empty clause matches every record.
#[derive(Debug, Clone, Default)]
pub struct FilterClause {
    constraints: Vec<Constraint>,
}

impl FilterClause {
    /// A clause matching everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the clause for a request's structured filters.
    pub fn from_filters(filters: &SearchFilters, config: &FilterConfig) -> Result<Self> {
        let mut clause = Self::new();

        if let Some(form) = filters.dosage_form.as_deref() {
            let form = normalize_form(form);
            if !form.is_empty() {
                clause.push(Constraint::DosageForm(expand_dosage_form(&form, config)));
            }
        }
        if let Some(strength) = filters.strength.as_deref() {
            if let Some(matcher) = StrengthMatcher::parse(strength)? {
                clause.push(Constraint::Strength(matcher));
            }
        }
        if let Some(flag) = filters.is_generic {
            clause.push(Constraint::Generic(flag));
        }
        if let Some(id) = filters.normalized_ndc() {
            clause.push(Constraint::Id(id));
        }
        if let Some(schedule) = filters.dea_schedule.as_deref() {
            let schedule = schedule.trim().to_uppercase();
            if !schedule.is_empty() {
                clause.push(Constraint::DeaSchedule(schedule));
            }
        }

        Ok(clause)
    }

    /// Add a constraint.
    pub fn push(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    /// This clause AND ingredient class equals `class`.
    pub fn with_ingredient_class(mut self, class: &str) -> Self {
        self.push(Constraint::IngredientClass(normalize_class(class)));
        self
    }

    /// This clause AND therapeutic class equals `class`.
    pub fn with_therapeutic_class(mut self, class: &str) -> Self {
        self.push(Constraint::TherapeuticClass(normalize_class(class)));
        self
    }

    /// Whether the clause has no constraints.
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// Whether a record satisfies every constraint.
    pub fn matches(&self, record: &FormulationRecord) -> bool {
        self.constraints.iter().all(|c| c.matches(record))
    }

    /// Field-to-value summary for diagnostics.
    pub fn describe(&self) -> BTreeMap<String, String> {
        self.constraints
            .iter()
            .map(|c| {
                let (field, value) = c.describe();
                (field.to_string(), value)
            })
            .collect()
    }
}

fn expand_dosage_form(form: &str, config: &FilterConfig) -> BTreeSet<String> {
    let mut forms = BTreeSet::new();
    forms.insert(form.to_string());
    for (alias, concrete) in &config.dosage_form_aliases {
        if normalize_form(alias) == form {
            forms.extend(concrete.iter().map(|f| normalize_form(f)));
        }
    }
    forms
}

// ============================================================================
// Exclusions
// ============================================================================

/// Drops compounding bases and supplies before grouping.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    patterns: Vec<Regex>,
}

impl ExclusionFilter {
    /// Compile the configured patterns (case-insensitive).
    pub fn new(config: &ExclusionConfig) -> Result<Self> {
        let patterns = config
            .patterns
            .iter()
            .map(|p| {
                Regex::new(&format!("(?i){p}"))
                    .map_err(|e| Error::config(format!("exclusion pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Whether the record's ingredient class or display name hits a pattern.
    pub fn is_excluded(&self, record: &FormulationRecord) -> bool {
        let class = record.ingredient_class.trim();
        let name = record.display_name.trim();
        self.patterns
            .iter()
            .any(|p| p.is_match(class) || p.is_match(name))
    }

    /// Number of compiled patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Whether no patterns are configured.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
