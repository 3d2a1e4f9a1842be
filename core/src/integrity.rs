//! Numeric integrity guard.
//!
//! NaN and infinity have historically leaked into stored macro fields
//! through malformed imports and portion-scaling bugs, so the finiteness
//! invariant is enforced redundantly: at load (lenient deserialization in
//! `models`), at aggregation and display (here), and before save (in the
//! sync client). Aggregation is deliberately more forgiving than cleanup:
//! a corrupted field counts as zero in totals, but the entry itself is
//! only removed by an explicit user action.

use crate::models::DailyEntry;

/// True when any macro field on the entry is non-finite.
#[must_use]
pub fn is_corrupted(entry: &DailyEntry) -> bool {
    ![entry.calories, entry.protein, entry.carbs, entry.fat]
        .iter()
        .all(|v| v.is_finite())
}

/// Number of corrupted entries, for surfacing a repair prompt.
#[must_use]
pub fn count_corrupted(entries: &[DailyEntry]) -> usize {
    entries.iter().filter(|e| is_corrupted(e)).count()
}

/// Drop corrupted entries, logging each removal. This is the cleanup
/// action; it runs only when the user asks for it or on a load that is
/// re-persisted immediately, never silently in between.
#[must_use]
pub fn filter_corrupted(entries: Vec<DailyEntry>) -> Vec<DailyEntry> {
    entries
        .into_iter()
        .filter(|entry| {
            if is_corrupted(entry) {
                tracing::warn!(
                    id = entry.id,
                    name = %entry.name,
                    date = %entry.date,
                    "removing entry with non-finite macro values"
                );
                false
            } else {
                true
            }
        })
        .collect()
}

/// Summed macros for a set of entries.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MacroTotals {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() { value } else { 0.0 }
}

/// Sum macro fields across entries, treating each non-finite field as
/// zero for that field only. Entries are not dropped here — a single bad
/// field must not erase the rest of an otherwise valid entry from the
/// day's totals.
#[must_use]
pub fn safe_aggregate(entries: &[DailyEntry]) -> MacroTotals {
    entries.iter().fold(MacroTotals::default(), |mut acc, e| {
        acc.calories += finite_or_zero(e.calories);
        acc.protein += finite_or_zero(e.protein);
        acc.carbs += finite_or_zero(e.carbs);
        acc.fat += finite_or_zero(e.fat);
        acc
    })
}

/// Format a possibly non-finite value for display. NaN would otherwise
/// render literally as the string "NaN".
#[must_use]
pub fn safe_display(value: f64, decimals: usize) -> String {
    if value.is_finite() {
        format!("{value:.decimals$}")
    } else {
        "0".to_string()
    }
}
