//! Test data builders for slots and annotated rows

use serde_json::json;
use stepflow_rs::annotation::{DataAnnotation, TextAnnotation};
use stepflow_rs::slot::{Slot, SlotInfo, SlotRow};

/// Builder for creating annotated test rows
pub struct RowBuilder {
    row: SlotRow,
}

impl RowBuilder {
    pub fn new() -> Self {
        Self {
            row: SlotRow::new(json!(null)),
        }
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.row.payload = payload;
        self
    }

    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.row.text_annotations.push(TextAnnotation::new(name, value));
        self
    }

    pub fn data(mut self, name: &str, payload: serde_json::Value) -> Self {
        self.row.data_annotations.push(DataAnnotation::new(name, payload));
        self
    }

    pub fn build(self) -> SlotRow {
        self.row
    }
}

impl Default for RowBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating test slots
pub struct SlotBuilder {
    slot: Slot,
}

impl SlotBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            slot: Slot::new(name, SlotInfo::default()),
        }
    }

    pub fn optional(name: &str) -> Self {
        Self {
            slot: Slot::new(name, SlotInfo::optional()),
        }
    }

    pub fn row(mut self, row: RowBuilder) -> Self {
        self.slot.push_row(row.build());
        self
    }

    /// Shorthand for a row with a single text annotation.
    pub fn annotated_row(self, name: &str, value: &str) -> Self {
        self.row(RowBuilder::new().text(name, value))
    }

    /// Shorthand for a row without annotations.
    pub fn plain_row(self) -> Self {
        self.row(RowBuilder::new())
    }

    pub fn build(self) -> Slot {
        self.slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders_produce_annotated_rows() {
        let slot = SlotBuilder::new("images")
            .row(RowBuilder::new().text("sample", "a").data("mask", json!(1)))
            .build();
        assert_eq!(slot.row_count(), 1);
        assert_eq!(slot.text_annotation(0, "sample"), Some("a"));
        assert_eq!(slot.row(0).data_annotations.len(), 1);
    }
}
