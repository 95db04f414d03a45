//! Shared fixtures: a small statin and topical-steroid catalogue with
//! hand-built five-dimensional embeddings, plus index doubles.
//!
//! Embedding axes: rosuvastatin, atorvastatin, simvastatin, corticosteroid,
//! other.

use async_trait::async_trait;
use formulary_core::{Error, Result};
use formulary_vector::StaticEmbeddingProvider;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::SearchConfig;
use crate::index::{FormularyIndex, InMemoryIndex, IndexQuery};
use crate::types::FormulationRecord;

pub const DIMENSION: usize = 5;

const STATINS: &str = "HMG-COA REDUCTASE INHIBITORS";
const TOPICAL_STEROIDS: &str = "CORTICOSTEROIDS - TOPICAL";

fn tablet(id: &str, name: &str, class: &str, strength: &str, manufacturer: &str) -> FormulationRecord {
    FormulationRecord::new(id, name)
        .with_generic_name(class.to_lowercase())
        .with_classes(class, STATINS)
        .with_form("TABLET", strength)
        .with_manufacturer(manufacturer)
}

/// Every fixture record with its embedding, in index order.
pub fn catalog() -> Vec<(FormulationRecord, Vec<f32>)> {
    vec![
        (
            tablet("r1", "CRESTOR 10 MG TABLET", "ROSUVASTATIN CALCIUM", "10 MG", "AstraZeneca")
                .with_brand("CRESTOR"),
            vec![1.0, 0.0, 0.0, 0.0, 0.0],
        ),
        (
            tablet("r2", "CRESTOR 20 MG TABLET", "ROSUVASTATIN CALCIUM", "20 MG", "AstraZeneca")
                .with_brand("CRESTOR"),
            vec![1.0, 0.0, 0.0, 0.0, 0.0],
        ),
        (
            tablet("r3", "ROSUVASTATIN CALCIUM 10 MG TABLET", "ROSUVASTATIN CALCIUM", "10 MG", "Teva"),
            vec![0.95, 0.05, 0.0, 0.0, 0.0],
        ),
        (
            tablet("r4", "ROSUVASTATIN CALCIUM 20 MG TABLET", "ROSUVASTATIN CALCIUM", "20 MG", "Aurobindo"),
            vec![0.95, 0.05, 0.0, 0.0, 0.0],
        ),
        (
            tablet("a1", "LIPITOR 40 MG TABLET", "ATORVASTATIN CALCIUM", "40 MG", "Pfizer")
                .with_brand("LIPITOR"),
            vec![0.0, 1.0, 0.0, 0.0, 0.0],
        ),
        (
            tablet("a2", "ATORVASTATIN CALCIUM 40 MG TABLET", "ATORVASTATIN CALCIUM", "40 MG", "Greenstone"),
            vec![0.0, 1.0, 0.0, 0.0, 0.0],
        ),
        (
            tablet("s1", "SIMVASTATIN 20 MG TABLET", "SIMVASTATIN", "20 MG", "Accord"),
            vec![0.0, 0.0, 1.0, 0.0, 0.0],
        ),
        (
            tablet("s2", "ZOCOR 20 MG TABLET", "SIMVASTATIN", "20 MG", "Merck").with_brand("ZOCOR"),
            vec![0.0, 0.0, 1.0, 0.0, 0.0],
        ),
        (
            tablet("p1", "PRAVASTATIN SODIUM 40 MG TABLET", "PRAVASTATIN SODIUM", "40 MG", "Teva"),
            vec![0.0, 0.0, 0.0, 0.0, 1.0],
        ),
        (
            FormulationRecord::new("h1", "HYDROCORTISONE 1% CREAM")
                .with_generic_name("hydrocortisone")
                .with_classes("HYDROCORTISONE", TOPICAL_STEROIDS)
                .with_form("CREAM", "1%")
                .with_manufacturer("Fougera"),
            vec![0.0, 0.0, 0.0, 1.0, 0.0],
        ),
        (
            FormulationRecord::new("c1", "TRIAMCINOLONE ACETONIDE 0.1% CREAM")
                .with_generic_name("triamcinolone acetonide")
                .with_classes("TRIAMCINOLONE ACETONIDE", TOPICAL_STEROIDS)
                .with_form("CREAM", "0.1%")
                .with_manufacturer("Taro"),
            vec![0.0, 0.0, 0.0, 1.0, 0.0],
        ),
        (
            FormulationRecord::new("h2", "CORTISONE ACETATE 25 MG TABLET")
                .with_generic_name("cortisone acetate")
                .with_classes("CORTISONE ACETATE", "GLUCOCORTICOIDS")
                .with_form("TABLET", "25 MG"),
            vec![0.3, 0.0, 0.0, 0.9, 0.0],
        ),
        (
            FormulationRecord::new("x1", "VEHICLE CREAM BASE")
                .with_classes("VEHICLE CREAM BASE", "Miscellaneous")
                .with_form("CREAM", ""),
            vec![0.0, 0.0, 0.0, 0.0, 1.0],
        ),
    ]
}

/// The catalogue loaded into an [`InMemoryIndex`].
pub fn catalog_index() -> InMemoryIndex {
    let mut index = InMemoryIndex::new();
    for (record, embedding) in catalog() {
        index.insert(record, embedding).unwrap();
    }
    index
}

/// Term vectors aligned with the catalogue axes.
pub fn term_embeddings() -> StaticEmbeddingProvider {
    StaticEmbeddingProvider::new(DIMENSION)
        .with_vector("crestor", vec![1.0, 0.0, 0.0, 0.0, 0.0])
        .with_vector("rosuvastatin", vec![1.0, 0.0, 0.0, 0.0, 0.0])
        .with_vector("atorvastatin", vec![0.0, 1.0, 0.0, 0.0, 0.0])
        .with_vector("lipitor", vec![0.0, 1.0, 0.0, 0.0, 0.0])
        .with_vector("simvastatin", vec![0.0, 0.0, 1.0, 0.0, 0.0])
        .with_vector("hydrocortisone", vec![0.0, 0.0, 0.0, 1.0, 0.0])
}

/// Defaults, except vector hits must score at least 0.2.
pub fn test_config() -> SearchConfig {
    let mut config = SearchConfig::default();
    config.search.min_similarity = 0.2;
    config
}

// ============================================================================
// Index doubles
// ============================================================================

/// Returns the same records for every query.
pub struct StubIndex {
    records: Vec<FormulationRecord>,
}

impl StubIndex {
    pub fn new(records: Vec<FormulationRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl FormularyIndex for StubIndex {
    async fn search(&self, _query: &IndexQuery) -> Result<Vec<FormulationRecord>> {
        Ok(self.records.clone())
    }

    fn name(&self) -> &str {
        "stub"
    }

    fn document_count(&self) -> Result<usize> {
        Ok(self.records.len())
    }
}

/// Every query fails.
pub struct FailingIndex;

#[async_trait]
impl FormularyIndex for FailingIndex {
    async fn search(&self, _query: &IndexQuery) -> Result<Vec<FormulationRecord>> {
        Err(Error::index("index unreachable"))
    }

    fn name(&self) -> &str {
        "failing"
    }

    fn document_count(&self) -> Result<usize> {
        Err(Error::index("index unreachable"))
    }
}

/// Delays queries before answering from the catalogue.
pub struct SlowIndex {
    inner: InMemoryIndex,
    delay: Duration,
    filters_only: bool,
}

impl SlowIndex {
    /// Delay every query.
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: catalog_index(),
            delay,
            filters_only: false,
        }
    }

    /// Delay only filter queries; vector queries answer at once.
    pub fn filters_only(delay: Duration) -> Self {
        Self {
            filters_only: true,
            ..Self::new(delay)
        }
    }
}

#[async_trait]
impl FormularyIndex for SlowIndex {
    async fn search(&self, query: &IndexQuery) -> Result<Vec<FormulationRecord>> {
        if !(self.filters_only && query.is_vector()) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.search(query).await
    }

    fn name(&self) -> &str {
        "slow"
    }

    fn document_count(&self) -> Result<usize> {
        self.inner.document_count()
    }
}

/// Counts queries passed through to an inner index.
pub struct CountingIndex {
    inner: InMemoryIndex,
    calls: AtomicUsize,
}

impl CountingIndex {
    pub fn new(inner: InMemoryIndex) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FormularyIndex for CountingIndex {
    async fn search(&self, query: &IndexQuery) -> Result<Vec<FormulationRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.search(query).await
    }

    fn name(&self) -> &str {
        "counting"
    }

    fn document_count(&self) -> Result<usize> {
        self.inner.document_count()
    }
}
