//! Text and data annotations attached to slot rows, and the merge policies
//! applied when multiple rows contribute to the same iteration step.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A named string annotation on a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextAnnotation {
    pub name: String,
    pub value: String,
}

impl TextAnnotation {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A named structured annotation on a row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataAnnotation {
    pub name: String,
    pub payload: serde_json::Value,
}

impl DataAnnotation {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// How colliding text annotation values are combined within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TextAnnotationMergeMode {
    /// Distinct values are unioned into a sorted JSON array string.
    /// A single surviving value stays a plain string. Order independent.
    #[default]
    Merge,
    OverwriteExisting,
    SkipExisting,
    Discard,
}

impl TextAnnotationMergeMode {
    /// Fold `incoming` annotations into `target` under this policy.
    pub fn merge_into(self, target: &mut BTreeMap<String, String>, incoming: &[TextAnnotation]) {
        for annotation in incoming {
            match self {
                TextAnnotationMergeMode::Merge => {
                    match target.get(&annotation.name) {
                        Some(existing) if *existing != annotation.value => {
                            let merged = merge_values(existing, &annotation.value);
                            target.insert(annotation.name.clone(), merged);
                        }
                        Some(_) => {}
                        None => {
                            target.insert(annotation.name.clone(), annotation.value.clone());
                        }
                    };
                }
                TextAnnotationMergeMode::OverwriteExisting => {
                    target.insert(annotation.name.clone(), annotation.value.clone());
                }
                TextAnnotationMergeMode::SkipExisting => {
                    target
                        .entry(annotation.name.clone())
                        .or_insert_with(|| annotation.value.clone());
                }
                TextAnnotationMergeMode::Discard => {}
            }
        }
    }
}

/// Union two annotation values into their canonical merged form.
///
/// Either side may already be a merged JSON array string; its elements are
/// flattened before the union. The result is sorted and deduplicated, so
/// merging is independent of contribution order. A union with one element
/// collapses back to a plain string.
pub fn merge_values(a: &str, b: &str) -> String {
    let mut values = BTreeSet::new();
    expand_value(a, &mut values);
    expand_value(b, &mut values);
    if values.len() == 1 {
        return values.into_iter().next().unwrap_or_default();
    }
    let sorted: Vec<&String> = values.iter().collect();
    serde_json::to_string(&sorted).unwrap_or_default()
}

fn expand_value(value: &str, into: &mut BTreeSet<String>) {
    if value.starts_with('[') {
        if let Ok(serde_json::Value::Array(items)) = serde_json::from_str(value) {
            for item in items {
                match item {
                    serde_json::Value::String(s) => {
                        into.insert(s);
                    }
                    other => {
                        into.insert(other.to_string());
                    }
                }
            }
            return;
        }
    }
    into.insert(value.to_string());
}

/// How colliding data annotation payloads are combined within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataAnnotationMergeMode {
    /// Colliding payloads are collected into a JSON array.
    #[default]
    MergeTables,
    OverwriteExisting,
    SkipExisting,
    Discard,
}

impl DataAnnotationMergeMode {
    /// Fold `incoming` annotations into `target` under this policy.
    pub fn merge_into(
        self,
        target: &mut BTreeMap<String, serde_json::Value>,
        incoming: &[DataAnnotation],
    ) {
        for annotation in incoming {
            match self {
                DataAnnotationMergeMode::MergeTables => {
                    match target.remove(&annotation.name) {
                        Some(existing) if existing != annotation.payload => {
                            let mut items = match existing {
                                serde_json::Value::Array(items) => items,
                                other => vec![other],
                            };
                            items.push(annotation.payload.clone());
                            target.insert(
                                annotation.name.clone(),
                                serde_json::Value::Array(items),
                            );
                        }
                        Some(existing) => {
                            target.insert(annotation.name.clone(), existing);
                        }
                        None => {
                            target.insert(annotation.name.clone(), annotation.payload.clone());
                        }
                    };
                }
                DataAnnotationMergeMode::OverwriteExisting => {
                    target.insert(annotation.name.clone(), annotation.payload.clone());
                }
                DataAnnotationMergeMode::SkipExisting => {
                    target
                        .entry(annotation.name.clone())
                        .or_insert_with(|| annotation.payload.clone());
                }
                DataAnnotationMergeMode::Discard => {}
            }
        }
    }
}
