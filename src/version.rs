//! Version identifier comparison.
//!
//! The catalogue mixes two version shapes: dotted numeric (`"103.2.1"`) and
//! opaque ordinals (timestamps, build numbers, size/hash tuples). Dotted
//! numeric values are compared component-wise; everything else falls back to
//! byte inequality where "different" counts as "higher". The fallback is
//! asymmetric on purpose: a needless update offer is cheaper than a silently
//! missed security update. It also means two legitimately unordered builds can
//! keep offering each other as updates; that asymmetry is accepted, not fixed.

use std::cmp::Ordering;

use lazy_regex::lazy_regex;

/// Returns true when `candidate` should be offered as an update over
/// `installed`.
pub fn is_higher(candidate: &str, installed: &str) -> bool {
    match (parse_dotted(candidate), parse_dotted(installed)) {
        (Some(c), Some(i)) => compare_components(&c, &i) == Ordering::Greater,
        _ => candidate != installed,
    }
}

pub fn is_equal(a: &str, b: &str) -> bool {
    match (parse_dotted(a), parse_dotted(b)) {
        (Some(a), Some(b)) => compare_components(&a, &b) == Ordering::Equal,
        _ => a == b,
    }
}

fn parse_dotted(value: &str) -> Option<Vec<u64>> {
    if !lazy_regex!(r"^[0-9]+(\.[0-9]+)*$").is_match(value) {
        return None;
    }
    value.split('.').map(|part| part.parse().ok()).collect()
}

/// Component-wise comparison; a missing trailing component counts as 0, so
/// "1.2" and "1.2.0" are equal.
fn compare_components(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}
