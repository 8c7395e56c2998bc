//! Adaptive parameters: per-step overrides of node parameters, computed by
//! rhai expressions over the step's merged annotations.
//!
//! Each override expression sees the step's annotations (as the `annotations`
//! map and as loose variables) plus `default_value`, the parameter's current
//! value. The name `default` itself is a reserved keyword in the expression
//! language and cannot be bound.
//! The result must keep the parameter's JSON kind; a string result is given a
//! second chance as serialized JSON, and anything else is a fatal type error.
//!
//! Because overrides mutate shared node state, a scheduler running a node
//! with adaptive parameters must execute its steps sequentially. The state
//! is snapshotted once per run and restored via [`ParameterRestoreGuard`]
//! whether the run succeeds, fails or is cancelled.

use crate::annotation::{TextAnnotation, TextAnnotationMergeMode};
use crate::error::{Result, StepFlowError};
use crate::progress::ProgressInfo;
use crate::scripting::{dynamic_to_json, json_to_dynamic, ExpressionScope, ScriptEngine};
use crate::step::IterationStep;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// The mutable parameter state of a node, keyed by parameter name.
pub type ParameterMap = BTreeMap<String, serde_json::Value>;

/// Parameter state shared between the node and its running steps.
pub type SharedParameters = Arc<RwLock<ParameterMap>>;

/// One adaptive override: an expression targeting one parameter key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveOverride {
    pub target_key: String,
    pub expression: String,
}

/// Configuration of the adaptive parameter overlay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveParameterSettings {
    pub overrides: Vec<AdaptiveOverride>,
    /// Attach the effective value as a text annotation on the step.
    pub attach_annotations: bool,
    /// Only attach when the value differs from the parameter default.
    pub attach_only_non_default: bool,
    pub annotation_prefix: String,
}

impl Default for AdaptiveParameterSettings {
    fn default() -> Self {
        Self {
            overrides: Vec::new(),
            attach_annotations: true,
            attach_only_non_default: true,
            annotation_prefix: "#param:".to_string(),
        }
    }
}

impl AdaptiveParameterSettings {
    pub fn is_enabled(&self) -> bool {
        !self.overrides.is_empty()
    }

    /// Apply all overrides for one step, mutating the shared parameter map.
    ///
    /// An override targeting an unknown parameter is logged and skipped; a
    /// result of the wrong kind is fatal.
    pub fn apply_to_step(
        &self,
        parameters: &SharedParameters,
        step: &mut IterationStep,
        engine: &ScriptEngine,
        progress: &ProgressInfo,
    ) -> Result<()> {
        let mut parameters = parameters
            .write()
            .map_err(|_| StepFlowError::Workload("Parameter state lock poisoned".to_string()))?;
        for adaptive in &self.overrides {
            let Some(current) = parameters.get(&adaptive.target_key).cloned() else {
                progress.warn(&format!(
                    "Adaptive override targets unknown parameter '{}', skipping",
                    adaptive.target_key
                ));
                continue;
            };
            let expression = engine.compile(&adaptive.target_key, &adaptive.expression)?;
            let scope = ExpressionScope::new()
                .push_annotations("annotations", step.text_annotations())
                .push_dynamic("default_value", json_to_dynamic(&current));
            let result = engine.eval_dynamic(&expression, scope)?;
            let value = coerce(dynamic_to_json(&result)?, &current, &adaptive.target_key)?;
            let changed = value != current;
            if self.attach_annotations && (changed || !self.attach_only_non_default) {
                let serialized =
                    serde_json::to_string(&value).unwrap_or_else(|_| value.to_string());
                step.merge_text_annotations(
                    &[TextAnnotation::new(
                        format!("{}{}", self.annotation_prefix, adaptive.target_key),
                        serialized,
                    )],
                    TextAnnotationMergeMode::OverwriteExisting,
                );
            }
            parameters.insert(adaptive.target_key.clone(), value);
        }
        Ok(())
    }
}

/// Enforce that an override result keeps the parameter's JSON kind. A string
/// result may instead be serialized JSON of the right kind.
fn coerce(
    result: serde_json::Value,
    current: &serde_json::Value,
    key: &str,
) -> Result<serde_json::Value> {
    if same_kind(&result, current) {
        return Ok(result);
    }
    if let serde_json::Value::String(text) = &result {
        match serde_json::from_str::<serde_json::Value>(text) {
            Ok(parsed) if same_kind(&parsed, current) => return Ok(parsed),
            Ok(parsed) => {
                return Err(StepFlowError::AdaptiveType {
                    key: key.to_string(),
                    message: format!(
                        "expected {}, parsed string into {}",
                        kind_name(current),
                        kind_name(&parsed)
                    ),
                })
            }
            Err(error) => {
                return Err(StepFlowError::AdaptiveType {
                    key: key.to_string(),
                    message: format!("string result is not valid JSON: {error}"),
                })
            }
        }
    }
    Err(StepFlowError::AdaptiveType {
        key: key.to_string(),
        message: format!(
            "expected {}, expression produced {}",
            kind_name(current),
            kind_name(&result)
        ),
    })
}

fn same_kind(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    kind_name(a) == kind_name(b)
}

fn kind_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Snapshot of the parameter state, restored on drop.
///
/// Taken once at run start; restoring on drop covers success, failure and
/// cancellation alike.
pub struct ParameterRestoreGuard {
    parameters: SharedParameters,
    snapshot: ParameterMap,
}

impl ParameterRestoreGuard {
    pub fn new(parameters: &SharedParameters) -> Result<Self> {
        let snapshot = parameters
            .read()
            .map_err(|_| StepFlowError::Workload("Parameter state lock poisoned".to_string()))?
            .clone();
        Ok(Self {
            parameters: parameters.clone(),
            snapshot,
        })
    }
}

impl Drop for ParameterRestoreGuard {
    fn drop(&mut self) {
        if let Ok(mut parameters) = self.parameters.write() {
            *parameters = std::mem::take(&mut self.snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parameters(pairs: &[(&str, serde_json::Value)]) -> SharedParameters {
        Arc::new(RwLock::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        ))
    }

    fn step_with_annotation(name: &str, value: &str) -> IterationStep {
        let mut step = IterationStep::new();
        step.merge_text_annotations(
            &[TextAnnotation::new(name, value)],
            TextAnnotationMergeMode::Merge,
        );
        step
    }

    fn settings(target: &str, expression: &str) -> AdaptiveParameterSettings {
        AdaptiveParameterSettings {
            overrides: vec![AdaptiveOverride {
                target_key: target.to_string(),
                expression: expression.to_string(),
            }],
            ..AdaptiveParameterSettings::default()
        }
    }

    #[test]
    fn test_override_from_annotation() {
        let parameters = parameters(&[("threshold", json!(10))]);
        let mut step = step_with_annotation("threshold", "42");
        settings("threshold", r#"parse_int(annotations["threshold"])"#)
            .apply_to_step(&parameters, &mut step, &ScriptEngine::new(), &ProgressInfo::new())
            .unwrap();
        assert_eq!(parameters.read().unwrap()["threshold"], json!(42));
        assert_eq!(step.text_annotation("#param:threshold"), Some("42"));
    }

    #[test]
    fn test_default_value_binding_keeps_value() {
        let parameters = parameters(&[("threshold", json!(10))]);
        let mut step = IterationStep::new();
        settings("threshold", "default_value")
            .apply_to_step(&parameters, &mut step, &ScriptEngine::new(), &ProgressInfo::new())
            .unwrap();
        assert_eq!(parameters.read().unwrap()["threshold"], json!(10));
        // Unchanged values are not attached by default.
        assert_eq!(step.text_annotation("#param:threshold"), None);
    }

    #[test]
    fn test_string_result_parsed_as_json() {
        let parameters = parameters(&[("threshold", json!(10))]);
        let mut step = IterationStep::new();
        settings("threshold", r#""17""#)
            .apply_to_step(&parameters, &mut step, &ScriptEngine::new(), &ProgressInfo::new())
            .unwrap();
        assert_eq!(parameters.read().unwrap()["threshold"], json!(17));
    }

    #[test]
    fn test_kind_mismatch_is_fatal() {
        let parameters = parameters(&[("threshold", json!(10))]);
        let mut step = IterationStep::new();
        let error = settings("threshold", r#""not a number""#)
            .apply_to_step(&parameters, &mut step, &ScriptEngine::new(), &ProgressInfo::new())
            .unwrap_err();
        assert!(matches!(error, StepFlowError::AdaptiveType { .. }));
    }

    #[test]
    fn test_unknown_key_is_skipped() {
        let parameters = parameters(&[("threshold", json!(10))]);
        let mut step = IterationStep::new();
        settings("missing", "1")
            .apply_to_step(&parameters, &mut step, &ScriptEngine::new(), &ProgressInfo::new())
            .unwrap();
        assert!(!parameters.read().unwrap().contains_key("missing"));
    }

    #[test]
    fn test_restore_guard_rolls_back() {
        let parameters = parameters(&[("threshold", json!(10))]);
        {
            let _guard = ParameterRestoreGuard::new(&parameters).unwrap();
            parameters
                .write()
                .unwrap()
                .insert("threshold".to_string(), json!(99));
        }
        assert_eq!(parameters.read().unwrap()["threshold"], json!(10));
    }
}
