//! Query-understanding payload parsing.
//!
//! The understanding step is an external collaborator that returns JSON.
//! Parsing is lenient about shapes (`terms` for `search_terms`, numbers for
//! strengths, lists for single values) and falls back to the raw query text
//! as a single term when the payload cannot be used at all.

use formulary_core::{Error, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::config::FilterConfig;
use crate::filters::SearchFilters;
use crate::types::SearchRequest;

#[allow(clippy::expect_used)]
static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{L}\p{N}][\p{L}\p{N}.%/-]*").expect("Invalid regex"));

/// Split raw query text into word tokens, deduplicated case-insensitively.
///
/// `"Crestor 10mg, crestor"` becomes `["Crestor", "10mg"]`.
pub fn raw_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    WORD.find_iter(query)
        .map(|m| m.as_str().trim_end_matches(['.', '-', '/']))
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// The parsed query-understanding result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryUnderstanding {
    /// Normalized search terms, in order.
    pub terms: Vec<String>,
    /// Free-text rendering of the query, when provided.
    pub search_text: Option<String>,
    /// Extracted filters, before auto-apply is considered.
    pub filters: SearchFilters,
    /// Spelling corrections.
    pub corrections: Vec<String>,
    /// Confidence in `[0, 1]`.
    pub confidence: Option<f32>,
}

impl QueryUnderstanding {
    /// Parse a JSON payload.
    ///
    /// Fails when the payload is not a JSON object or carries no term list.
    /// An explicit empty list is accepted.
    pub fn from_json(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(&value)
    }

    /// Parse an already-decoded payload.
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::invalid_data("understanding payload is not an object"))?;

        let terms = match object.get("search_terms").or_else(|| object.get("terms")) {
            Some(value @ (Value::Array(_) | Value::String(_))) => string_list(value),
            Some(_) => {
                return Err(Error::invalid_data(
                    "understanding payload search_terms is not a list",
                ));
            }
            None => {
                return Err(Error::invalid_data(
                    "understanding payload has no search_terms",
                ));
            }
        };

        let search_text = object
            .get("search_text")
            .and_then(scalar_string)
            .filter(|s| !s.is_empty());

        let filters = object
            .get("filters")
            .and_then(Value::as_object)
            .map(parse_filters)
            .unwrap_or_default();

        let corrections = object
            .get("corrections")
            .map(string_list)
            .unwrap_or_default();

        let confidence = object
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0) as f32);

        Ok(Self {
            terms,
            search_text,
            filters,
            corrections,
            confidence,
        })
    }
}

fn parse_filters(map: &Map<String, Value>) -> SearchFilters {
    let get = |key: &str| map.get(key).and_then(first_scalar).filter(|s| !s.is_empty());

    let is_generic = map.get("is_generic").and_then(bool_value).or_else(|| {
        get("drug_type").and_then(|t| match t.to_ascii_lowercase().as_str() {
            "generic" => Some(true),
            "brand" => Some(false),
            _ => None,
        })
    });

    SearchFilters {
        dosage_form: get("dosage_form"),
        strength: get("strength"),
        is_generic,
        ndc: get("ndc"),
        dea_schedule: get("dea_schedule"),
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn first_scalar(value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => items.iter().find_map(scalar_string),
        other => scalar_string(other),
    }
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(scalar_string)
            .filter(|s| !s.is_empty())
            .collect(),
        other => scalar_string(other)
            .filter(|s| !s.is_empty())
            .into_iter()
            .collect(),
    }
}

fn bool_value(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "generic" => Some(true),
            "false" | "no" | "brand" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl SearchRequest {
    /// Build a request from the raw query and the understanding payload.
    ///
    /// A missing or malformed payload falls back to the word tokens of the raw
    /// query with no understood filters. Caller filters always apply.
    pub fn from_understanding(
        query: &str,
        payload: Option<&str>,
        user_filters: SearchFilters,
        limit: Option<usize>,
        config: &FilterConfig,
    ) -> Self {
        let parsed = match payload {
            Some(payload) => match QueryUnderstanding::from_json(payload) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    log::warn!("Query understanding payload unusable, using raw text: {e}");
                    None
                }
            },
            None => None,
        };

        match parsed {
            Some(understood) => Self {
                query: query.to_string(),
                terms: understood.terms,
                filters: SearchFilters::merge(
                    &user_filters,
                    &understood.filters,
                    &config.auto_apply,
                ),
                limit,
                corrections: understood.corrections,
                confidence: understood.confidence,
                understanding_fallback: false,
            },
            None => Self {
                query: query.to_string(),
                terms: raw_terms(query),
                filters: user_filters,
                limit,
                corrections: Vec::new(),
                confidence: None,
                understanding_fallback: true,
            },
        }
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
    fn test_parse_full_payload() {
        let payload = r#"{
            "search_terms": ["crestor"],
            "search_text": "crestor 10mg",
            "filters": {"strength": "10mg", "dosage_form": "tablet"},
            "corrections": ["cresstor -> crestor"],
            "confidence": 0.92
        }"#;
        let parsed = QueryUnderstanding::from_json(payload).unwrap();
        assert_eq!(parsed.terms, vec!["crestor"]);
        assert_eq!(parsed.search_text.as_deref(), Some("crestor 10mg"));
        assert_eq!(parsed.filters.strength.as_deref(), Some("10mg"));
        assert_eq!(parsed.filters.dosage_form.as_deref(), Some("tablet"));
        assert_eq!(parsed.corrections.len(), 1);
        assert!((parsed.confidence.unwrap() - 0.92).abs() < 1e-6);
    }

    #[test]
    fn test_parse_lenient_shapes() {
        let payload = r#"{
            "terms": ["atorvastatin", "", 42],
            "filters": {"strength": 12.5, "dosage_form": ["CREAM", "GEL"], "drug_type": "Brand"}
        }"#;
        let parsed = QueryUnderstanding::from_json(payload).unwrap();
        assert_eq!(parsed.terms, vec!["atorvastatin", "42"]);
        assert_eq!(parsed.filters.strength.as_deref(), Some("12.5"));
        assert_eq!(parsed.filters.dosage_form.as_deref(), Some("CREAM"));
        assert_eq!(parsed.filters.is_generic, Some(false));
        assert!(parsed.corrections.is_empty());
        assert!(parsed.confidence.is_none());
    }

    #[test]
    fn test_explicit_is_generic_beats_drug_type() {
        let payload = r#"{"search_terms": [], "filters": {"is_generic": "true", "drug_type": "brand"}}"#;
        let parsed = QueryUnderstanding::from_json(payload).unwrap();
        assert_eq!(parsed.filters.is_generic, Some(true));
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(QueryUnderstanding::from_json("[1, 2]").is_err());
        assert!(QueryUnderstanding::from_json("not json").is_err());
    }

    #[test]
    fn test_request_from_understanding_applies_auto_filters() {
        let payload = r#"{
            "search_terms": [],
            "filters": {"dosage_form": "CREAM", "dea_schedule": "CII"}
        }"#;
        let request = SearchRequest::from_understanding(
            "hydrocortisone cream",
            Some(payload),
            SearchFilters::default(),
            Some(10),
            &FilterConfig::default(),
        );
        assert!(request.terms.is_empty());
        assert_eq!(request.filters.dosage_form.as_deref(), Some("CREAM"));
        assert!(request.filters.dea_schedule.is_none());
        assert_eq!(request.limit, Some(10));
        assert!(!request.understanding_fallback);
    }

    #[test]
    fn test_request_from_malformed_payload_falls_back() {
        let user = SearchFilters {
            is_generic: Some(true),
            ..Default::default()
        };
        let request = SearchRequest::from_understanding(
            "  lipitor  ",
            Some("{oops"),
            user,
            None,
            &FilterConfig::default(),
        );
        assert_eq!(request.terms, vec!["lipitor"]);
        assert_eq!(request.filters.is_generic, Some(true));
        assert!(request.understanding_fallback);
    }

    #[test]
    fn test_request_from_missing_payload() {
        let request = SearchRequest::from_understanding(
            "",
            None,
            SearchFilters::default(),
            None,
            &FilterConfig::default(),
        );
        assert!(request.terms.is_empty());
        assert!(request.understanding_fallback);
    }

    #[test]
    fn test_raw_terms_split_and_dedup() {
        assert_eq!(raw_terms("  Crestor tablet, crestor "), vec!["Crestor", "tablet"]);
        assert_eq!(raw_terms("hydrocortisone 1% cream."), vec!["hydrocortisone", "1%", "cream"]);
        assert_eq!(raw_terms("triamcinolone 0.1%"), vec!["triamcinolone", "0.1%"]);
        assert!(raw_terms(" , ; ").is_empty());
    }

    #[test]
    fn test_malformed_payload_splits_raw_words() {
        let request = SearchRequest::from_understanding(
            "crestor tablet",
            Some("not json"),
            SearchFilters::default(),
            None,
            &FilterConfig::default(),
        );
        assert_eq!(request.terms, vec!["crestor", "tablet"]);
        assert!(request.understanding_fallback);
    }

    #[test]
    fn test_payload_without_terms_falls_back() {
        assert!(QueryUnderstanding::from_json("{}").is_err());
        assert!(QueryUnderstanding::from_json(r#"{"search_terms": 7}"#).is_err());

        let request = SearchRequest::from_understanding(
            "crestor",
            Some(r#"{"confidence": 0.4}"#),
            SearchFilters::default(),
            None,
            &FilterConfig::default(),
        );
        assert_eq!(request.terms, vec!["crestor"]);
        assert!(request.understanding_fallback);
        assert!(request.confidence.is_none());
    }

    #[test]
    fn test_explicit_empty_terms_are_kept() {
        let request = SearchRequest::from_understanding(
            "cholesterol medication",
            Some(r#"{"search_terms": [], "filters": {"is_generic": true}}"#),
            SearchFilters::default(),
            None,
            &FilterConfig::default(),
        );
        assert!(request.terms.is_empty());
        assert_eq!(request.filters.is_generic, Some(true));
        assert!(!request.understanding_fallback);
    }
}
