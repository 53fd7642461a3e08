//! Text search over cached values.
//!
//! Search is two-tier: a case-insensitive substring match over the
//! searchable fields, and only when that finds nothing, a fuzzy match
//! ranked by edit-distance similarity.

use crate::record::Record;

/// Similarity a fuzzy candidate must reach to be returned.
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.6;

/// Run the exact pass, falling back to the fuzzy pass when it is empty.
pub(crate) fn search<V: Record>(
    values: Vec<V>,
    fields: &[String],
    query: &str,
    threshold: f64,
) -> Vec<V> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return values;
    }

    let exact = exact_matches(&values, fields, &needle);
    if !exact.is_empty() {
        return exact;
    }
    fuzzy_matches(values, fields, &needle, threshold)
}

/// Values where any searchable field contains `needle` (already lowercased).
pub(crate) fn exact_matches<V: Record>(values: &[V], fields: &[String], needle: &str) -> Vec<V> {
    values
        .iter()
        .filter(|value| {
            fields.iter().any(|field| {
                value
                    .field(field)
                    .is_some_and(|text| text.to_lowercase().contains(needle))
            })
        })
        .cloned()
        .collect()
}

/// Values scoring at least `threshold`, best first. Ties keep store order.
pub(crate) fn fuzzy_matches<V: Record>(
    values: Vec<V>,
    fields: &[String],
    needle: &str,
    threshold: f64,
) -> Vec<V> {
    let mut scored: Vec<(f64, V)> = values
        .into_iter()
        .filter_map(|value| {
            let score = fields
                .iter()
                .filter_map(|field| value.field(field))
                .map(|text| field_score(needle, &text.to_lowercase()))
                .fold(0.0_f64, f64::max);
            (score >= threshold).then_some((score, value))
        })
        .collect();

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, value)| value).collect()
}

/// Best similarity of `needle` against the whole text or any of its words.
fn field_score(needle: &str, text: &str) -> f64 {
    text.split_whitespace()
        .map(|word| similarity(needle, word))
        .fold(similarity(needle, text), f64::max)
}

/// Normalized similarity in `[0, 1]`; 1 means identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 1.0;
    }
    1.0 - edit_distance(&a, &b) as f64 / longest as f64
}

/// Optimal string alignment distance: insertions, deletions, substitutions
/// and transpositions of adjacent characters each cost one.
fn edit_distance(a: &[char], b: &[char]) -> usize {
    let width = b.len() + 1;
    let mut rows = vec![0usize; (a.len() + 1) * width];
    let at = |i: usize, j: usize| i * width + j;

    for i in 0..=a.len() {
        rows[at(i, 0)] = i;
    }
    for j in 0..=b.len() {
        rows[at(0, j)] = j;
    }

    for i in 1..=a.len() {
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            let mut best = (rows[at(i - 1, j)] + 1)
                .min(rows[at(i, j - 1)] + 1)
                .min(rows[at(i - 1, j - 1)] + cost);
            if i > 1 && j > 1 && a[i - 1] == b[j - 2] && a[i - 2] == b[j - 1] {
                best = best.min(rows[at(i - 2, j - 2)] + 1);
            }
            rows[at(i, j)] = best;
        }
    }

    rows[at(a.len(), b.len())]
}
