//! Dictionary solver: a hash join keyed by the tuple of reference-column
//! values. Amortized O(R) over all rows when no wildcard expansion applies.
//!
//! A missing reference annotation is the wildcard `NA`. Per column, `NA`
//! expands to every distinct non-missing value only when the wildcard is
//! active for that column: `force_na_is_any` is set, or more than one
//! distinct value exists across all slots. An inactive wildcard degrades to
//! the literal empty value and only matches other missing rows.
//!
//! In single mode a wildcard-expanded row is consumed by the first group
//! (in canonical key order) that uses it; later groups go without it and
//! come out incomplete instead of silently duplicating the row.

use super::{GroupingConfig, RowGroup};
use crate::progress::ProgressInfo;
use crate::slot::Slot;
use std::collections::{BTreeMap, BTreeSet};

struct Bucket {
    /// Rows whose own annotations produced this key.
    rows: Vec<BTreeSet<usize>>,
    /// Rows mapped here through wildcard expansion.
    wildcard_rows: Vec<BTreeSet<usize>>,
}

impl Bucket {
    fn new(slot_count: usize) -> Self {
        Self {
            rows: vec![BTreeSet::new(); slot_count],
            wildcard_rows: vec![BTreeSet::new(); slot_count],
        }
    }
}

pub(super) fn solve(
    slots: &[Slot],
    columns: &BTreeSet<String>,
    config: &GroupingConfig,
    progress: &ProgressInfo,
) -> Vec<RowGroup> {
    let columns: Vec<&str> = columns.iter().map(String::as_str).collect();

    // Distinct non-missing values per column, across all slots.
    let mut values: Vec<BTreeSet<String>> = vec![BTreeSet::new(); columns.len()];
    for slot in slots {
        for row in 0..slot.row_count() {
            for (index, column) in columns.iter().enumerate() {
                if let Some(value) = slot.text_annotation(row, column) {
                    values[index].insert(value.to_string());
                }
            }
        }
    }
    let wildcard_active: Vec<bool> = values
        .iter()
        .map(|distinct| config.force_na_is_any || distinct.len() > 1)
        .collect();

    // BTreeMap keeps key-tuple order deterministic.
    let mut buckets: BTreeMap<Vec<String>, Bucket> = BTreeMap::new();
    for (slot_index, slot) in slots.iter().enumerate() {
        for row in 0..slot.row_count() {
            if progress.is_cancelled() {
                return Vec::new();
            }
            let mut option_sets: Vec<Vec<String>> = Vec::with_capacity(columns.len());
            let mut expanded = false;
            for (index, column) in columns.iter().enumerate() {
                match slot.text_annotation(row, column) {
                    Some(value) => option_sets.push(vec![value.to_string()]),
                    None if wildcard_active[index] && !values[index].is_empty() => {
                        expanded = expanded || values[index].len() > 1;
                        option_sets.push(values[index].iter().cloned().collect());
                    }
                    None => option_sets.push(vec![String::new()]),
                }
            }
            for key in cartesian(&option_sets) {
                let bucket = buckets
                    .entry(key)
                    .or_insert_with(|| Bucket::new(slots.len()));
                if expanded {
                    bucket.wildcard_rows[slot_index].insert(row);
                } else {
                    bucket.rows[slot_index].insert(row);
                }
            }
        }
    }

    progress.log(&format!("{} group key(s) resolved", buckets.len()));
    if config.apply_merging {
        materialize_merging(slots.len(), &columns, buckets)
    } else {
        materialize_single(slots.len(), &columns, buckets)
    }
}

/// Merging mode: one group per key, wildcard rows shared across all their keys.
fn materialize_merging(
    slot_count: usize,
    columns: &[&str],
    buckets: BTreeMap<Vec<String>, Bucket>,
) -> Vec<RowGroup> {
    let mut groups = Vec::new();
    for (key, bucket) in buckets {
        let mut group = RowGroup::new(slot_count);
        for slot_index in 0..slot_count {
            group.rows[slot_index].extend(&bucket.rows[slot_index]);
            group.rows[slot_index].extend(&bucket.wildcard_rows[slot_index]);
        }
        if !group.is_empty() {
            group.key = key_map(columns, &key);
            groups.push(group);
        }
    }
    groups
}

/// Single mode: one group per key, each wildcard row consumed at most once.
/// More than one candidate row for a slot marks the group ambiguous.
fn materialize_single(
    slot_count: usize,
    columns: &[&str],
    buckets: BTreeMap<Vec<String>, Bucket>,
) -> Vec<RowGroup> {
    let mut used_wildcard: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); slot_count];
    let mut groups = Vec::new();
    for (key, bucket) in buckets {
        let mut group = RowGroup::new(slot_count);
        for slot_index in 0..slot_count {
            group.rows[slot_index].extend(&bucket.rows[slot_index]);
            for &row in &bucket.wildcard_rows[slot_index] {
                if used_wildcard[slot_index].insert(row) {
                    group.rows[slot_index].insert(row);
                }
            }
            if group.rows[slot_index].len() > 1 {
                group.ambiguous = true;
            }
        }
        if !group.is_empty() {
            group.key = key_map(columns, &key);
            groups.push(group);
        }
    }
    groups
}

fn key_map(columns: &[&str], key: &[String]) -> BTreeMap<String, String> {
    columns
        .iter()
        .zip(key)
        .filter(|(_, value)| !value.is_empty())
        .map(|(column, value)| (column.to_string(), value.clone()))
        .collect()
}

/// Cartesian product of the per-column key options, in lexicographic order.
fn cartesian(option_sets: &[Vec<String>]) -> Vec<Vec<String>> {
    let mut keys: Vec<Vec<String>> = vec![Vec::new()];
    for options in option_sets {
        let mut next = Vec::with_capacity(keys.len() * options.len());
        for key in &keys {
            for option in options {
                let mut extended = key.clone();
                extended.push(option.clone());
                next.push(extended);
            }
        }
        keys = next;
    }
    keys
}
