//! Integer index-range expressions for limiting iteration steps.
//!
//! The accepted textual form is a list of tokens separated by `;` or `,`,
//! where each token is either a single index (`5`) or an inclusive range
//! (`0-2`). When the string does not parse as plain ranges it is evaluated as
//! a Rhai expression with `count` bound to the number of steps; the result
//! must be an integer or an array of integers.
//!
//! Out-of-range indices are silently dropped; selecting `20` out of 10 steps
//! is legal and selects nothing extra.

use crate::error::{Result, StepFlowError};
use crate::scripting::{ExpressionScope, ScriptEngine};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An index-range expression evaluated against a step count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexRange {
    source: String,
}

impl IndexRange {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Resolve to the set of selected indices in `0..count`.
    pub fn resolve(&self, count: usize, engine: &ScriptEngine) -> Result<BTreeSet<usize>> {
        if let Some(indices) = self.parse_plain() {
            return Ok(indices.into_iter().filter(|&i| i < count).collect());
        }
        self.resolve_expression(count, engine)
    }

    /// Try the plain `0-2;5;7` form. Returns `None` if any token fails.
    fn parse_plain(&self) -> Option<BTreeSet<usize>> {
        let mut indices = BTreeSet::new();
        for token in self.source.split([';', ',']) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if let Some((start, end)) = token.split_once('-') {
                let start: usize = start.trim().parse().ok()?;
                let end: usize = end.trim().parse().ok()?;
                if start > end {
                    return None;
                }
                indices.extend(start..=end);
            } else {
                indices.insert(token.parse().ok()?);
            }
        }
        Some(indices)
    }

    fn resolve_expression(&self, count: usize, engine: &ScriptEngine) -> Result<BTreeSet<usize>> {
        let scope = ExpressionScope::new().push_int("count", count as i64);
        let value = engine.eval(&self.source, scope)?;

        let mut indices = BTreeSet::new();
        if let Ok(single) = value.as_int() {
            push_index(&mut indices, single, count);
            return Ok(indices);
        }
        if let Some(array) = value.read_lock::<rhai::Array>() {
            for item in array.iter() {
                let index = item.as_int().map_err(|t| {
                    StepFlowError::Script(format!(
                        "Limit expression must yield integers, got {}",
                        t
                    ))
                })?;
                push_index(&mut indices, index, count);
            }
            return Ok(indices);
        }
        Err(StepFlowError::Script(format!(
            "Limit expression must yield an integer or integer array, got {}",
            value.type_name()
        )))
    }
}

fn push_index(indices: &mut BTreeSet<usize>, index: i64, count: usize) {
    if index >= 0 && (index as usize) < count {
        indices.insert(index as usize);
    }
}
