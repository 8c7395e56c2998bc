//! Input slots: annotated row tables consumed by iteration-step generation.

use crate::annotation::{DataAnnotation, TextAnnotation};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Static properties of a slot, independent of its current rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotInfo {
    /// Optional slots may contribute nothing without making a step incomplete.
    pub optional: bool,
}

impl SlotInfo {
    pub fn optional() -> Self {
        Self { optional: true }
    }
}

/// One row of a slot: a payload plus its annotations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotRow {
    pub payload: serde_json::Value,
    pub text_annotations: Vec<TextAnnotation>,
    pub data_annotations: Vec<DataAnnotation>,
}

impl SlotRow {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            text_annotations: Vec::new(),
            data_annotations: Vec::new(),
        }
    }

    /// Value of the named text annotation, if present on this row.
    pub fn text_annotation(&self, name: &str) -> Option<&str> {
        self.text_annotations
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }
}

/// A named input slot holding zero or more annotated rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    name: String,
    info: SlotInfo,
    rows: Vec<SlotRow>,
}

impl Slot {
    pub fn new(name: impl Into<String>, info: SlotInfo) -> Self {
        Self {
            name: name.into(),
            info,
            rows: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> SlotInfo {
        self.info
    }

    pub fn is_optional(&self) -> bool {
        self.info.optional
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, index: usize) -> &SlotRow {
        &self.rows[index]
    }

    pub fn rows(&self) -> &[SlotRow] {
        &self.rows
    }

    pub fn push_row(&mut self, row: SlotRow) {
        self.rows.push(row);
    }

    /// Text annotation value of a row, `None` when the row lacks it.
    pub fn text_annotation(&self, row: usize, name: &str) -> Option<&str> {
        self.rows[row].text_annotation(name)
    }

    /// All text annotation names appearing on any row of this slot.
    pub fn text_annotation_names(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|row| row.text_annotations.iter().map(|a| a.name.clone()))
            .collect()
    }

    /// Text annotations of the given rows, in row order.
    pub fn text_annotations_of<'a>(
        &'a self,
        rows: impl IntoIterator<Item = &'a usize>,
    ) -> Vec<&'a TextAnnotation> {
        rows.into_iter()
            .flat_map(|&row| self.rows[row].text_annotations.iter())
            .collect()
    }

    /// Data annotations of the given rows, in row order.
    pub fn data_annotations_of<'a>(
        &'a self,
        rows: impl IntoIterator<Item = &'a usize>,
    ) -> Vec<&'a DataAnnotation> {
        rows.into_iter()
            .flat_map(|&row| self.rows[row].data_annotations.iter())
            .collect()
    }
}
