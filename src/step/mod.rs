//! Iteration steps: the unit of work a node executes once per matched group.

mod builder;

pub use builder::{generate_steps, StepGenerationResult};

use crate::annotation::{
    DataAnnotation, DataAnnotationMergeMode, TextAnnotation, TextAnnotationMergeMode,
};
use crate::slot::Slot;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// One matched group of input rows plus its merged annotations.
///
/// Steps are ordered by a canonical comparator over their merged text
/// annotations so that repeated runs over unchanged inputs yield the same
/// step order and indices (the index-range limit depends on this).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationStep {
    /// Contributing row indices per slot name.
    contributions: BTreeMap<String, BTreeSet<usize>>,
    text_annotations: BTreeMap<String, String>,
    data_annotations: BTreeMap<String, serde_json::Value>,
    /// Position in the final sorted step list.
    index: usize,
    ambiguous: bool,
}

impl IterationStep {
    pub fn new() -> Self {
        Self {
            contributions: BTreeMap::new(),
            text_annotations: BTreeMap::new(),
            data_annotations: BTreeMap::new(),
            index: 0,
            ambiguous: false,
        }
    }

    pub fn add_rows(&mut self, slot_name: &str, rows: impl IntoIterator<Item = usize>) {
        self.contributions
            .entry(slot_name.to_string())
            .or_default()
            .extend(rows);
    }

    /// Row indices contributed by a slot. Empty when the slot contributed none.
    pub fn input_rows(&self, slot_name: &str) -> BTreeSet<usize> {
        self.contributions.get(slot_name).cloned().unwrap_or_default()
    }

    pub fn contributions(&self) -> &BTreeMap<String, BTreeSet<usize>> {
        &self.contributions
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub(crate) fn set_ambiguous(&mut self, ambiguous: bool) {
        self.ambiguous = ambiguous;
    }

    /// Single mode found more than one candidate row for a slot.
    pub fn is_ambiguous(&self) -> bool {
        self.ambiguous
    }

    /// A step is complete iff every non-optional slot contributed at least
    /// one row and no ambiguity was recorded.
    pub fn is_complete(&self, slots: &[Slot]) -> bool {
        if self.ambiguous {
            return false;
        }
        slots.iter().all(|slot| {
            slot.is_optional()
                || self
                    .contributions
                    .get(slot.name())
                    .map(|rows| !rows.is_empty())
                    .unwrap_or(false)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.contributions.values().all(|rows| rows.is_empty())
    }

    pub fn text_annotations(&self) -> &BTreeMap<String, String> {
        &self.text_annotations
    }

    pub fn text_annotation(&self, name: &str) -> Option<&str> {
        self.text_annotations.get(name).map(String::as_str)
    }

    pub fn data_annotations(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.data_annotations
    }

    /// Merge text annotations into this step under the given policy.
    pub fn merge_text_annotations(
        &mut self,
        incoming: &[TextAnnotation],
        mode: TextAnnotationMergeMode,
    ) {
        mode.merge_into(&mut self.text_annotations, incoming);
    }

    /// Merge data annotations into this step under the given policy.
    pub fn merge_data_annotations(
        &mut self,
        incoming: &[DataAnnotation],
        mode: DataAnnotationMergeMode,
    ) {
        mode.merge_into(&mut self.data_annotations, incoming);
    }
}

impl Default for IterationStep {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialOrd for IterationStep {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IterationStep {
    /// Compare merged annotation values over the sorted union of both steps'
    /// annotation names, an absent annotation sorting as the empty string.
    fn cmp(&self, other: &Self) -> Ordering {
        let names: BTreeSet<&String> = self
            .text_annotations
            .keys()
            .chain(other.text_annotations.keys())
            .collect();
        for name in names {
            let left = self.text_annotation(name).unwrap_or("");
            let right = other.text_annotation(name).unwrap_or("");
            match left.cmp(right) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        self.contributions.cmp(&other.contributions)
    }
}

/// Position of a step within a run, handed to the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationContext {
    pub index: usize,
    pub total: usize,
}
