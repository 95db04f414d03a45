//! Configuration for the search engine.
//!
//! Provides the [`SearchConfig`] struct that loads from TOML files,
//! environment variables, and defaults using the `confyg` crate. Every
//! vocabulary the engine consults (condition words, dosage-form words,
//! auto-applied filters, the therapeutic-class deny list) lives here and is
//! handed to the engine at construction time; nothing is read from globals.
//!
//! # Loading Priority
//!
//! 1. Explicit config path
//! 2. `FORMULARY_CONFIG` environment variable
//! 3. XDG default: `~/.config/formulary/config.toml`
//! 4. Built-in defaults

use confyg::{Confygery, env};
use formulary_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::filters::FilterKey;

// ============================================================================
// Configuration structs
// ============================================================================

/// Main configuration for the search engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Limits, concurrency and deadline.
    pub search: EngineConfig,

    /// Term cleanup vocabularies and the multi-term threshold.
    pub strategy: StrategyConfig,

    /// Which understood filters auto-apply and how dosage forms expand.
    pub filters: FilterConfig,

    /// Class expansion behaviour.
    pub expansion: ExpansionConfig,

    /// Match classification policy.
    pub classifier: ClassifierPolicy,

    /// Post-expansion exclusion patterns.
    pub exclusions: ExclusionConfig,
}

/// Limits, concurrency and deadline for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Result limit used when the request does not give one.
    pub default_limit: usize,

    /// Largest result limit a request may ask for.
    pub max_limit: usize,

    /// Single-term hybrid queries fetch `limit * candidate_multiplier` candidates.
    pub candidate_multiplier: usize,

    /// Candidates fetched per term in multi-term mode.
    pub per_term_limit: usize,

    /// Vector hits scoring below this similarity are not returned by the index.
    pub min_similarity: f32,

    /// Maximum sub-queries in flight at once.
    pub max_concurrency: usize,

    /// Per-request deadline in milliseconds.
    pub deadline_ms: u64,
}

/// Term cleanup vocabularies and the multi-term threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Term count at which multi-term mode is selected.
    pub multi_term_threshold: usize,

    /// Terms shorter than this (in characters) are discarded.
    pub min_term_chars: usize,

    /// Condition and category words that never reach the index as terms.
    pub condition_terms: BTreeSet<String>,

    /// Dosage-form words; these are matched through the dosage-form filter instead.
    pub dosage_form_terms: BTreeSet<String>,

    /// Unit-only tokens such as `mg`.
    pub unit_terms: BTreeSet<String>,
}

/// Filter handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Filters taken from the query-understanding result. Caller filters always apply.
    pub auto_apply: BTreeSet<FilterKey>,

    /// Generic dosage forms and the concrete index forms they stand for.
    pub dosage_form_aliases: BTreeMap<String, Vec<String>>,
}

/// Class expansion behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpansionConfig {
    /// Whether exact matches are expanded by ingredient and therapeutic class.
    pub enabled: bool,

    /// Therapeutic classes too broad to expand.
    pub therapeutic_class_denylist: BTreeSet<String>,
}

/// Match classification policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierPolicy {
    /// Keep families that are neither exact, equivalent nor alternative.
    pub include_other: bool,
}

/// Records matching any of these patterns are dropped before grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExclusionConfig {
    /// Case-insensitive regular expressions over ingredient class and display name.
    pub patterns: Vec<String>,
}

// ============================================================================
// Default implementations
// ============================================================================

fn string_set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
            candidate_multiplier: 3,
            per_term_limit: 20,
            min_similarity: 0.0,
            max_concurrency: 5,
            deadline_ms: 5_000,
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            multi_term_threshold: 3,
            min_term_chars: 3,
            condition_terms: string_set(&[
                "blood",
                "cholesterol",
                "diabetes",
                "drugs",
                "dyslipidemia",
                "for",
                "high",
                "hyperlipidemia",
                "hypertension",
                "low",
                "medication",
                "pain",
                "pressure",
                "treatment",
            ]),
            dosage_form_terms: string_set(&[
                "ampule",
                "capsule",
                "cartridge",
                "cream",
                "drops",
                "gel",
                "inhaler",
                "injectable",
                "injection",
                "liquid",
                "lotion",
                "ointment",
                "patch",
                "pellet",
                "powder",
                "solution",
                "spray",
                "suppository",
                "suspension",
                "syringe",
                "syrup",
                "tablet",
                "vial",
            ]),
            unit_terms: string_set(&["%", "g", "mcg", "mg", "ml", "unit", "units"]),
        }
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        let mut dosage_form_aliases = BTreeMap::new();
        dosage_form_aliases.insert(
            "INJECTION".to_string(),
            ["VIAL", "SOL", "AMPULE", "CARTRIDGE", "SYRINGE"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        dosage_form_aliases.insert(
            "ORAL".to_string(),
            ["TABLET", "CAPSULE", "SOLUTION", "SUSPENSION", "SYRUP"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );

        Self {
            auto_apply: [
                FilterKey::DosageForm,
                FilterKey::Strength,
                FilterKey::IsGeneric,
                FilterKey::Ndc,
            ]
            .into_iter()
            .collect(),
            dosage_form_aliases,
        }
    }
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            therapeutic_class_denylist: string_set(&[
                "Bulk Chemicals",
                "Miscellaneous",
                "Not Specified",
                "Uncategorized",
            ]),
        }
    }
}

impl Default for ExclusionConfig {
    fn default() -> Self {
        Self {
            patterns: [
                r"BASE[_\s]*NO\.",
                r"^MENTHOL$",
                r"^CAMPHOR$",
                r"^GELFILM$",
                r"^POLYDIMETHYLSILOXANES$",
                r"DIAPER.*DISPOSABLE",
                r"^HYPROMELLOSE$",
                r"VEHICLE[_\s]",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl EngineConfig {
    /// The per-request deadline as a `Duration`.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

// ============================================================================
// Config loading
// ============================================================================

impl SearchConfig {
    /// Load configuration from file, environment, and defaults.
    ///
    /// Loading priority:
    /// 1. Explicit `config_path`
    /// 2. `FORMULARY_CONFIG` env var
    /// 3. XDG default: `~/.config/formulary/config.toml`
    /// 4. Built-in defaults
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder =
            Confygery::new().map_err(|e| Error::config(format!("config init: {e}")))?;

        if let Some(path) = Self::resolve_config_path(config_path) {
            if path.exists() {
                builder
                    .add_file(&path.to_string_lossy())
                    .map_err(|e| Error::config(format!("config file: {e}")))?;
            }
        }

        let mut env_opts = env::Options::with_top_level("FORMULARY");
        env_opts.add_section("search");
        env_opts.add_section("strategy");
        env_opts.add_section("filters");
        env_opts.add_section("expansion");
        env_opts.add_section("classifier");
        env_opts.add_section("exclusions");
        builder
            .add_env(env_opts)
            .map_err(|e| Error::config(format!("config env: {e}")))?;

        let config: Self = builder
            .build()
            .map_err(|e| Error::config(format!("config build: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file path from explicit path, env var, or XDG default.
    pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(PathBuf::from(path));
        }

        if let Ok(path) = std::env::var("FORMULARY_CONFIG") {
            return Some(PathBuf::from(path));
        }

        Self::default_config_path()
    }

    /// Return the XDG default config path.
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("formulary").join("config.toml"))
    }

    /// Serialize this config to a pretty-printed TOML string.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::config(e.to_string()))
    }

    /// Check the values the engine relies on.
    pub fn validate(&self) -> Result<()> {
        let search = &self.search;
        if search.default_limit == 0 {
            return Err(Error::config("search.default_limit must be at least 1"));
        }
        if search.max_limit < search.default_limit {
            return Err(Error::config(
                "search.max_limit must not be below search.default_limit",
            ));
        }
        if search.candidate_multiplier == 0 || search.per_term_limit == 0 {
            return Err(Error::config(
                "search.candidate_multiplier and search.per_term_limit must be at least 1",
            ));
        }
        if search.max_concurrency == 0 {
            return Err(Error::config("search.max_concurrency must be at least 1"));
        }
        if !(0.0..=1.0).contains(&search.min_similarity) {
            return Err(Error::config("search.min_similarity must be within [0, 1]"));
        }
        if self.strategy.multi_term_threshold < 2 {
            return Err(Error::config(
                "strategy.multi_term_threshold must be at least 2",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
