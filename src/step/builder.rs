//! Turns matched row groups into ordered, policy-checked iteration steps.

use super::IterationStep;
use crate::annotation::{DataAnnotation, TextAnnotation};
use crate::error::{Result, StepFlowError};
use crate::matching::{self, GroupingConfig, ReferenceColumns, RowGroup};
use crate::matching::AnnotationMatchingMethod;
use crate::progress::ProgressInfo;
use crate::scripting::ScriptEngine;
use crate::slot::Slot;
use crate::validation::{ValidationEntry, ValidationReport};

/// Outcome of step generation.
#[derive(Debug)]
pub struct StepGenerationResult {
    pub steps: Vec<IterationStep>,
    pub reference_columns: ReferenceColumns,
}

/// Generate the ordered iteration steps for a node run.
///
/// Pipeline: resolve reference columns, solve row groups, merge annotations,
/// sort canonically, apply the index limit, then apply the incomplete-step
/// policy. Externally supplied parameter annotations merge into every step,
/// including the empty steps of input-less nodes. Nodes without input slots
/// run exactly once; a node whose optional inputs are all empty runs once
/// with an empty step when `allows_empty_iteration` is set.
pub fn generate_steps(
    slots: &[Slot],
    config: &GroupingConfig,
    parameter_annotations: &[TextAnnotation],
    engine: &ScriptEngine,
    progress: &ProgressInfo,
    allows_empty_iteration: bool,
) -> Result<StepGenerationResult> {
    if slots.is_empty() {
        let mut step = IterationStep::new();
        step.merge_text_annotations(parameter_annotations, config.annotation_merge_strategy);
        return Ok(StepGenerationResult {
            steps: vec![step],
            reference_columns: ReferenceColumns::Columns(Default::default()),
        });
    }

    let reference_columns = matching::select_columns(
        config.column_matching,
        slots,
        config.custom_columns.as_deref(),
        engine,
        progress,
    )?;

    if slots.iter().all(Slot::is_empty) {
        let steps = if allows_empty_iteration && slots.iter().all(Slot::is_optional) {
            let mut step = IterationStep::new();
            step.merge_text_annotations(parameter_annotations, config.annotation_merge_strategy);
            vec![step]
        } else {
            Vec::new()
        };
        return Ok(StepGenerationResult {
            steps,
            reference_columns,
        });
    }

    let groups = if single_input_fast_path(slots, config, &reference_columns) {
        per_row_groups(&slots[0])
    } else {
        matching::solve(slots, &reference_columns, config, engine, progress)?
    };

    let mut steps: Vec<IterationStep> = Vec::with_capacity(groups.len());
    for group in groups {
        if progress.is_cancelled() {
            return Ok(StepGenerationResult {
                steps: Vec::new(),
                reference_columns,
            });
        }
        let mut step = IterationStep::new();
        step.set_ambiguous(group.ambiguous);
        for (slot_index, slot) in slots.iter().enumerate() {
            let rows = &group.rows[slot_index];
            step.add_rows(slot.name(), rows.iter().copied());
            let text: Vec<TextAnnotation> = slot
                .text_annotations_of(rows)
                .into_iter()
                .cloned()
                .collect();
            step.merge_text_annotations(&text, config.annotation_merge_strategy);
            let data: Vec<DataAnnotation> = slot
                .data_annotations_of(rows)
                .into_iter()
                .cloned()
                .collect();
            step.merge_data_annotations(&data, config.data_annotation_merge_strategy);
        }
        step.merge_text_annotations(parameter_annotations, config.annotation_merge_strategy);
        if !step.is_empty() {
            steps.push(step);
        }
    }

    steps.sort();
    for (index, step) in steps.iter_mut().enumerate() {
        step.set_index(index);
    }

    if let Some(limit) = &config.limit {
        let selected = limit.resolve(steps.len(), engine)?;
        let before = steps.len();
        steps.retain(|step| selected.contains(&step.index()));
        progress.log(&format!(
            "Limit '{}' kept {} of {} step(s)",
            limit.source(),
            steps.len(),
            before
        ));
    }

    // The policy sees the limited list: a skipped or failing step is one the
    // run would actually have executed.
    steps = apply_incomplete_policy(steps, slots, config, progress)?;
    for (index, step) in steps.iter_mut().enumerate() {
        step.set_index(index);
    }

    progress.log(&format!("Generated {} iteration step(s)", steps.len()));
    Ok(StepGenerationResult {
        steps,
        reference_columns,
    })
}

/// A single required input in single mode iterates plainly over its rows;
/// no solver round trip needed.
fn single_input_fast_path(
    slots: &[Slot],
    config: &GroupingConfig,
    reference_columns: &ReferenceColumns,
) -> bool {
    slots.len() == 1
        && !config.apply_merging
        && !config.force_flow_graph_solver
        && config.annotation_matching_method == AnnotationMatchingMethod::ExactMatch
        && matches!(reference_columns, ReferenceColumns::Columns(_))
}

fn per_row_groups(slot: &Slot) -> Vec<RowGroup> {
    (0..slot.row_count())
        .map(|row| {
            let mut group = RowGroup::new(1);
            group.rows[0].insert(row);
            group
        })
        .collect()
}

/// Drop incomplete steps when the skip policy is set; otherwise any
/// incomplete step fails validation before a single workload runs.
fn apply_incomplete_policy(
    steps: Vec<IterationStep>,
    slots: &[Slot],
    config: &GroupingConfig,
    progress: &ProgressInfo,
) -> Result<Vec<IterationStep>> {
    let incomplete = steps
        .iter()
        .filter(|step| !step.is_complete(slots))
        .count();
    if incomplete == 0 {
        return Ok(steps);
    }

    if config.skip_incomplete_data_sets {
        progress.warn(&format!("Skipping {incomplete} incomplete iteration step(s)"));
        return Ok(steps
            .into_iter()
            .filter(|step| step.is_complete(slots))
            .collect());
    }

    let mut report = ValidationReport::new();
    for step in steps.iter().filter(|step| !step.is_complete(slots)) {
        let missing: Vec<&str> = slots
            .iter()
            .filter(|slot| !slot.is_optional() && step.input_rows(slot.name()).is_empty())
            .map(Slot::name)
            .collect();
        let explanation = if step.is_ambiguous() {
            "More than one candidate row was found for a slot in single mode".to_string()
        } else {
            format!(
                "No matching row was found for required slot(s): {}",
                missing.join(", ")
            )
        };
        report.push(ValidationEntry::error(
            "Incomplete iteration step",
            explanation,
            "Review the column matching settings, or enable skipping of \
             incomplete steps if partial data sets are expected",
        ));
    }
    Err(StepFlowError::Validation(report))
}
