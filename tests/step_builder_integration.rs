//! End-to-end step generation: grouping, merging, ordering, policies.

mod common;

use common::builders::{RowBuilder, SlotBuilder};
use common::contributions;
use serde_json::json;
use std::collections::BTreeSet;
use stepflow_rs::annotation::TextAnnotationMergeMode;
use stepflow_rs::limit::IndexRange;
use stepflow_rs::matching::{ColumnMatching, GroupingConfig};
use stepflow_rs::progress::ProgressInfo;
use stepflow_rs::scripting::ScriptEngine;
use stepflow_rs::slot::Slot;
use stepflow_rs::step::{generate_steps, StepGenerationResult};
use stepflow_rs::{Result, StepFlowError};

fn generate(slots: &[Slot], config: &GroupingConfig) -> Result<StepGenerationResult> {
    generate_steps(
        slots,
        config,
        &[],
        &ScriptEngine::new(),
        &ProgressInfo::new(),
        false,
    )
}

fn union_config() -> GroupingConfig {
    GroupingConfig {
        column_matching: ColumnMatching::Union,
        ..GroupingConfig::default()
    }
}

fn numbered_slot(name: &str, count: usize) -> Slot {
    let mut builder = SlotBuilder::new(name);
    for index in 0..count {
        builder = builder.annotated_row("x", &format!("{index}"));
    }
    builder.build()
}

#[test]
fn generation_is_idempotent() {
    let slots = vec![
        numbered_slot("a", 4),
        numbered_slot("b", 4),
    ];
    let config = union_config();
    let first = generate(&slots, &config).unwrap();
    let second = generate(&slots, &config).unwrap();
    assert_eq!(first.steps, second.steps);
}

#[test]
fn limit_tokens_select_sorted_indices() {
    let slots = vec![numbered_slot("a", 6)];
    let config = GroupingConfig {
        limit: Some(IndexRange::new("0-2;5")),
        ..union_config()
    };
    let result = generate(&slots, &config).unwrap();
    let values: Vec<&str> = result
        .steps
        .iter()
        .map(|s| s.text_annotation("x").unwrap())
        .collect();
    assert_eq!(values, vec!["0", "1", "2", "5"]);
    // Kept steps are re-indexed contiguously.
    let indices: Vec<usize> = result.steps.iter().map(|s| s.index()).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[test]
fn limit_out_of_range_indices_are_ignored() {
    let slots = vec![numbered_slot("a", 3)];
    let config = GroupingConfig {
        limit: Some(IndexRange::new("1;7;9")),
        ..union_config()
    };
    let result = generate(&slots, &config).unwrap();
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].text_annotation("x"), Some("1"));
}

#[test]
fn limit_expression_sees_step_count() {
    let slots = vec![numbered_slot("a", 4)];
    let config = GroupingConfig {
        limit: Some(IndexRange::new("[count - 1]")),
        ..union_config()
    };
    let result = generate(&slots, &config).unwrap();
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].text_annotation("x"), Some("3"));
}

#[test]
fn wildcard_union_merging_produces_two_complete_steps() {
    let slots = vec![
        SlotBuilder::new("a")
            .annotated_row("x", "1")
            .annotated_row("x", "2")
            .build(),
        SlotBuilder::new("b").plain_row().build(),
    ];
    let result = generate(&slots, &union_config()).unwrap();
    assert_eq!(result.steps.len(), 2);
    for step in &result.steps {
        assert_eq!(step.input_rows("b"), BTreeSet::from([0]));
    }
}

#[test]
fn wildcard_union_single_mode_flags_incomplete_instead_of_duplicating() {
    let slots = vec![
        SlotBuilder::new("a")
            .annotated_row("x", "1")
            .annotated_row("x", "2")
            .build(),
        SlotBuilder::new("b").plain_row().build(),
    ];
    let config = GroupingConfig {
        apply_merging: false,
        ..union_config()
    };
    // Slot B has one row for two groups: the second group is incomplete,
    // which fails validation by default.
    let error = generate(&slots, &config).unwrap_err();
    assert!(matches!(error, StepFlowError::Validation(_)));

    // With the skip policy the complete step survives alone.
    let config = GroupingConfig {
        skip_incomplete_data_sets: true,
        ..config
    };
    let result = generate(&slots, &config).unwrap();
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].input_rows("b"), BTreeSet::from([0]));
}

#[test]
fn three_slot_mixed_wildcard_joins_both_groups() {
    let slots = vec![
        SlotBuilder::new("a")
            .annotated_row("x", "1")
            .annotated_row("x", "2")
            .build(),
        SlotBuilder::new("b").plain_row().build(),
        SlotBuilder::new("c")
            .annotated_row("x", "2")
            .annotated_row("x", "1")
            .build(),
    ];
    let result = generate(&slots, &union_config()).unwrap();
    assert_eq!(result.steps.len(), 2);
    assert_eq!(
        contributions(&result.steps[0], &["a", "b", "c"]),
        vec![
            BTreeSet::from([0]),
            BTreeSet::from([0]),
            BTreeSet::from([1]),
        ]
    );
    assert_eq!(
        contributions(&result.steps[1], &["a", "b", "c"]),
        vec![
            BTreeSet::from([1]),
            BTreeSet::from([0]),
            BTreeSet::from([0]),
        ]
    );
}

#[test]
fn force_na_is_any_joins_single_valued_columns() {
    let slots = vec![
        SlotBuilder::new("a").annotated_row("x", "1").build(),
        SlotBuilder::new("b").plain_row().build(),
    ];
    // Without the force flag, one distinct value means no wildcard.
    let error = generate(&slots, &union_config()).unwrap_err();
    assert!(matches!(error, StepFlowError::Validation(_)));

    let config = GroupingConfig {
        force_na_is_any: true,
        ..union_config()
    };
    let result = generate(&slots, &config).unwrap();
    assert_eq!(result.steps.len(), 1);
    assert_eq!(result.steps[0].input_rows("a"), BTreeSet::from([0]));
    assert_eq!(result.steps[0].input_rows("b"), BTreeSet::from([0]));
}

#[test]
fn annotation_merge_is_order_independent_across_slots() {
    let forward = vec![
        SlotBuilder::new("a")
            .row(RowBuilder::new().text("x", "1").text("note", "p"))
            .build(),
        SlotBuilder::new("b")
            .row(RowBuilder::new().text("x", "1").text("note", "q"))
            .build(),
    ];
    let backward = vec![
        SlotBuilder::new("a")
            .row(RowBuilder::new().text("x", "1").text("note", "q"))
            .build(),
        SlotBuilder::new("b")
            .row(RowBuilder::new().text("x", "1").text("note", "p"))
            .build(),
    ];
    let config = union_config();
    let first = generate(&forward, &config).unwrap();
    let second = generate(&backward, &config).unwrap();
    assert_eq!(first.steps[0].text_annotation("note"), Some(r#"["p","q"]"#));
    assert_eq!(
        first.steps[0].text_annotations(),
        second.steps[0].text_annotations()
    );
}

#[test]
fn overwrite_merge_mode_keeps_last_contribution() {
    let slots = vec![
        SlotBuilder::new("a")
            .row(RowBuilder::new().text("x", "1").text("note", "p"))
            .build(),
        SlotBuilder::new("b")
            .row(RowBuilder::new().text("x", "1").text("note", "q"))
            .build(),
    ];
    let config = GroupingConfig {
        annotation_merge_strategy: TextAnnotationMergeMode::OverwriteExisting,
        ..union_config()
    };
    let result = generate(&slots, &config).unwrap();
    assert_eq!(result.steps[0].text_annotation("note"), Some("q"));
}

#[test]
fn data_annotations_are_merged_into_steps() {
    let slots = vec![
        SlotBuilder::new("a")
            .row(RowBuilder::new().text("x", "1").data("mask", json!({"id": 1})))
            .build(),
        SlotBuilder::new("b")
            .row(RowBuilder::new().text("x", "1").data("mask", json!({"id": 2})))
            .build(),
    ];
    let result = generate(&slots, &union_config()).unwrap();
    assert_eq!(
        result.steps[0].data_annotations()["mask"],
        json!([{"id": 1}, {"id": 2}])
    );
}

#[test]
fn prefix_hash_columns_ignore_plain_annotations() {
    let slots = vec![
        SlotBuilder::new("a")
            .row(RowBuilder::new().text("#sample", "s1").text("comment", "left"))
            .build(),
        SlotBuilder::new("b")
            .row(RowBuilder::new().text("#sample", "s1").text("comment", "right"))
            .build(),
    ];
    // Default strategy matches only on "#" columns; the differing comments
    // do not split the step.
    let result = generate(&slots, &GroupingConfig::default()).unwrap();
    assert_eq!(result.steps.len(), 1);
}
