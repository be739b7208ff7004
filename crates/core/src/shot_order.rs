//! Shot ordering used to find a shot's predecessor.
//!
//! An explicit editorial order wins. Without one, shots are ordered by the
//! numeric value of their trailing digit group (`SHOT_01` -> 1), and ids
//! with no trailing digits follow, sorted lexicographically.
//!
//! Projects that mix `SHOT_10` with ids like `INTRO` get every numeric id
//! first; this mirrors how existing projects were sorted and has not been
//! checked against projects that interleave the two forms deliberately.

use std::cmp::Ordering;
use std::collections::HashSet;

/// Numeric key of a shot id: the value of its trailing ASCII digit run.
pub fn numeric_key(shot_id: &str) -> Option<u64> {
    let digits: String = shot_id
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Fallback comparison: numeric ids first by value, then the rest
/// lexicographically. Equal numeric keys tie-break on the full id.
pub fn fallback_cmp(a: &str, b: &str) -> Ordering {
    match (numeric_key(a), numeric_key(b)) {
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

/// Compute the full shot order.
///
/// With an editorial order, its listed shots come first in the listed
/// sequence (duplicates ignored) and any known shot it omits is appended in
/// fallback order.
pub fn order_shots(shot_ids: &[String], editorial: Option<&[String]>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut ordered = Vec::with_capacity(shot_ids.len());

    if let Some(editorial) = editorial.filter(|e| !e.is_empty()) {
        for id in editorial {
            if seen.insert(id.clone()) {
                ordered.push(id.clone());
            }
        }
    }

    let mut rest: Vec<String> = shot_ids
        .iter()
        .filter(|id| !seen.contains(*id))
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    rest.sort_by(|a, b| fallback_cmp(a, b));
    ordered.extend(rest);
    ordered
}

/// The shot immediately preceding `target` in `order`, if any.
pub fn previous_shot<'a>(order: &'a [String], target: &str) -> Option<&'a str> {
    let index = order.iter().position(|id| id == target)?;
    index.checked_sub(1).map(|i| order[i].as_str())
}
