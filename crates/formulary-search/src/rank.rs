//! Family ranking.

use std::cmp::Ordering;

use crate::types::DrugFamily;

/// Total order on families: match priority, best similarity descending
/// (missing scores last), display name, then group key.
pub fn compare_families(a: &DrugFamily, b: &DrugFamily) -> Ordering {
    a.match_type
        .priority()
        .cmp(&b.match_type.priority())
        .then_with(|| compare_similarity(a.best_similarity, b.best_similarity))
        .then_with(|| a.display_name.cmp(&b.display_name))
        .then_with(|| a.group_key.cmp(&b.group_key))
}

fn compare_similarity(a: Option<f32>, b: Option<f32>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Sort, then truncate to `limit`.
pub fn rank(mut families: Vec<DrugFamily>, limit: usize) -> Vec<DrugFamily> {
    families.sort_by(compare_families);
    families.truncate(limit);
    families
}

// ============================================================================
// Tests
// ============================================================================
