//! Row matching: reference column selection and the two grouping solvers.
//!
//! Rows from all input slots are partitioned into groups that share equal
//! (or wildcard-compatible) values on the resolved reference columns. Two
//! interchangeable solvers exist:
//!
//! - the **dictionary solver** (fast path): a hash join keyed by the tuple of
//!   reference-column values, with explicit wildcard expansion, and
//! - the **flow-graph solver** (general path): a layered compatibility graph
//!   solved by path enumeration, which additionally supports custom matching
//!   expressions.
//!
//! Both must produce equivalent groupings for well-formed inputs; the test
//! suite runs shared fixtures through both and asserts equivalence.

pub mod columns;
mod dictionary;
mod flow_graph;

pub use columns::{select_columns, ColumnMatching, ReferenceColumns};

use crate::annotation::{DataAnnotationMergeMode, TextAnnotationMergeMode};
use crate::error::{Result, StepFlowError};
use crate::limit::IndexRange;
use crate::progress::ProgressInfo;
use crate::scripting::ScriptEngine;
use crate::slot::Slot;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How two rows' reference annotations are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnnotationMatchingMethod {
    /// Values on shared reference columns must be equal.
    #[default]
    ExactMatch,
    /// A user expression decides, with `annotations`, `other_annotations`
    /// and `exact_match_results` in scope.
    CustomExpression,
}

/// Grouping-strategy configuration for one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    pub column_matching: ColumnMatching,
    /// Rhai filter over candidate column names, used by `ColumnMatching::Custom`.
    pub custom_columns: Option<String>,
    pub annotation_matching_method: AnnotationMatchingMethod,
    /// Rhai predicate used by `AnnotationMatchingMethod::CustomExpression`.
    pub custom_annotation_matching: String,
    pub force_flow_graph_solver: bool,
    pub force_na_is_any: bool,
    /// Merging mode allows many rows per slot per group; single mode at most one.
    pub apply_merging: bool,
    pub skip_incomplete_data_sets: bool,
    /// Post-sort step index filter.
    pub limit: Option<IndexRange>,
    pub annotation_merge_strategy: TextAnnotationMergeMode,
    pub data_annotation_merge_strategy: DataAnnotationMergeMode,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            column_matching: ColumnMatching::default(),
            custom_columns: None,
            annotation_matching_method: AnnotationMatchingMethod::default(),
            custom_annotation_matching: "exact_match_results".to_string(),
            force_flow_graph_solver: false,
            force_na_is_any: false,
            apply_merging: true,
            skip_incomplete_data_sets: false,
            limit: None,
            annotation_merge_strategy: TextAnnotationMergeMode::default(),
            data_annotation_merge_strategy: DataAnnotationMergeMode::default(),
        }
    }
}

impl GroupingConfig {
    /// Load a grouping configuration from TOML.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| StepFlowError::Config(e.to_string()))
    }
}

/// A matched group of rows: one prospective iteration step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowGroup {
    /// Contributing row indices, aligned with the input slot list.
    pub rows: Vec<BTreeSet<usize>>,
    /// The reference-column values this group was formed on (wildcards absent).
    pub key: BTreeMap<String, String>,
    /// Set when single mode found more than one candidate row for a slot.
    /// Ambiguous groups are classified as incomplete by the step builder.
    pub ambiguous: bool,
}

impl RowGroup {
    pub fn new(slot_count: usize) -> Self {
        Self {
            rows: vec![BTreeSet::new(); slot_count],
            key: BTreeMap::new(),
            ambiguous: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.iter().all(|rows| rows.is_empty())
    }
}

/// Partition rows from all slots into groups over the reference columns.
///
/// Dispatches to the merge-all/split-all fast paths, the dictionary solver
/// (exact matching, unless `force_flow_graph_solver`) or the flow-graph
/// solver. Cancellation yields an empty result without error.
pub fn solve(
    slots: &[Slot],
    reference_columns: &ReferenceColumns,
    config: &GroupingConfig,
    engine: &ScriptEngine,
    progress: &ProgressInfo,
) -> Result<Vec<RowGroup>> {
    match reference_columns {
        ReferenceColumns::MergeAll => Ok(solve_merge_all(
            slots,
            &progress.resolve_and_log("Merge into one group"),
        )),
        ReferenceColumns::SplitAll => Ok(solve_split_all(
            slots,
            &progress.resolve_and_log("Split into one group per row"),
        )),
        ReferenceColumns::Columns(columns) => {
            if !config.force_flow_graph_solver
                && config.annotation_matching_method == AnnotationMatchingMethod::ExactMatch
            {
                Ok(dictionary::solve(
                    slots,
                    columns,
                    config,
                    &progress.resolve_and_log("Dictionary solver"),
                ))
            } else {
                flow_graph::solve(
                    slots,
                    columns,
                    config,
                    engine,
                    &progress.resolve_and_log("Flow graph solver"),
                )
            }
        }
    }
}

/// Every row across every slot joins one single group.
fn solve_merge_all(slots: &[Slot], progress: &ProgressInfo) -> Vec<RowGroup> {
    if progress.is_cancelled() {
        return Vec::new();
    }
    let mut group = RowGroup::new(slots.len());
    for (slot_index, slot) in slots.iter().enumerate() {
        group.rows[slot_index].extend(0..slot.row_count());
    }
    if group.is_empty() {
        Vec::new()
    } else {
        vec![group]
    }
}

/// Every row becomes its own group.
fn solve_split_all(slots: &[Slot], progress: &ProgressInfo) -> Vec<RowGroup> {
    let mut groups = Vec::new();
    for (slot_index, slot) in slots.iter().enumerate() {
        for row in 0..slot.row_count() {
            if progress.is_cancelled() {
                return Vec::new();
            }
            let mut group = RowGroup::new(slots.len());
            group.rows[slot_index].insert(row);
            groups.push(group);
        }
    }
    groups
}
