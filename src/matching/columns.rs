//! Reference column selection: which annotation columns rows are matched on.

use crate::error::Result;
use crate::progress::ProgressInfo;
use crate::scripting::ScriptEngine;
use crate::slot::Slot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Annotation columns whose names carry this prefix are grouping keys by
/// convention, regardless of what else is annotated on the rows.
pub const HASH_PREFIX: &str = "#";

/// Strategy for picking the reference columns from the slots' annotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColumnMatching {
    /// All annotation names appearing on any slot.
    Union,
    /// Annotation names appearing on every non-empty slot.
    Intersection,
    /// Union restricted to names starting with `#`.
    #[default]
    PrefixHashUnion,
    /// Intersection restricted to names starting with `#`.
    PrefixHashIntersection,
    /// A rhai filter expression decides per candidate name.
    Custom,
    /// No matching: all rows form one group.
    MergeAll,
    /// No matching: every row forms its own group.
    SplitAll,
    /// Empty reference set: all rows compare equal.
    None,
}

/// Resolved reference columns, or one of the degenerate grouping modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceColumns {
    Columns(BTreeSet<String>),
    MergeAll,
    SplitAll,
}

impl ReferenceColumns {
    pub fn columns(&self) -> Option<&BTreeSet<String>> {
        match self {
            ReferenceColumns::Columns(columns) => Some(columns),
            _ => None,
        }
    }
}

/// Resolve the reference columns for the given slots.
///
/// An empty resolved set is legal (everything matches everything) but usually
/// unintended when several slots carry rows, so it is logged as a warning.
pub fn select_columns(
    strategy: ColumnMatching,
    slots: &[Slot],
    custom_filter: Option<&str>,
    engine: &ScriptEngine,
    progress: &ProgressInfo,
) -> Result<ReferenceColumns> {
    let resolved = match strategy {
        ColumnMatching::MergeAll => return Ok(ReferenceColumns::MergeAll),
        ColumnMatching::SplitAll => return Ok(ReferenceColumns::SplitAll),
        ColumnMatching::None => BTreeSet::new(),
        ColumnMatching::Union => union_of(slots),
        ColumnMatching::Intersection => intersection_of(slots),
        ColumnMatching::PrefixHashUnion => with_hash_prefix(union_of(slots)),
        ColumnMatching::PrefixHashIntersection => with_hash_prefix(intersection_of(slots)),
        ColumnMatching::Custom => {
            let source = custom_filter.unwrap_or("");
            engine
                .query_all("custom column filter", source, union_of(slots))?
                .into_iter()
                .collect()
        }
    };

    if resolved.is_empty() && strategy != ColumnMatching::None {
        let populated = slots.iter().filter(|slot| !slot.is_empty()).count();
        if populated > 1 {
            progress.warn(
                "No reference columns resolved; all rows will match each other. \
                 Check the column matching strategy if this is unintended.",
            );
        }
    }

    Ok(ReferenceColumns::Columns(resolved))
}

fn union_of(slots: &[Slot]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for slot in slots {
        names.extend(slot.text_annotation_names());
    }
    names
}

/// Intersection across non-empty slots; empty slots cannot veto columns
/// their rows never had a chance to carry.
fn intersection_of(slots: &[Slot]) -> BTreeSet<String> {
    let mut result: Option<BTreeSet<String>> = None;
    for slot in slots.iter().filter(|slot| !slot.is_empty()) {
        let names = slot.text_annotation_names();
        result = Some(match result {
            None => names,
            Some(current) => current.intersection(&names).cloned().collect(),
        });
    }
    result.unwrap_or_default()
}

fn with_hash_prefix(names: BTreeSet<String>) -> BTreeSet<String> {
    names
        .into_iter()
        .filter(|name| name.starts_with(HASH_PREFIX))
        .collect()
}
