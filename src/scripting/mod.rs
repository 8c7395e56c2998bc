//! Rhai Scripting Engine for iteration-step expressions
//!
//! This module provides a scripting engine based on Rhai that evaluates the
//! user-facing expressions of step generation:
//!
//! - **Custom column filters** — one boolean expression per candidate
//!   annotation name, with `value` bound to the name under test.
//! - **Custom annotation matching** — a predicate over two rows' reference
//!   annotations, with `annotations`, `other_annotations` and
//!   `exact_match_results` bound.
//! - **Adaptive parameter overrides** — an expression per overridden
//!   parameter, with the step's merged annotations and `default_value`
//!   bound (`default` itself is a reserved Rhai keyword).
//! - **Limit expressions** — index-range strings with an expression fallback
//!   that receives `count`.
//!
//! ## Example Expressions
//!
//! Keep only hash-prefixed columns plus `dataset`:
//! ```rhai
//! value == "dataset" || value.starts_with("#")
//! ```
//!
//! Match rows whose `sample` annotations agree, ignoring everything else:
//! ```rhai
//! annotations["sample"] == other_annotations["sample"]
//! ```
//!
//! Derive a threshold parameter from an annotation, falling back to the
//! configured value:
//! ```rhai
//! if "threshold" in annotations { parse_float(annotations.threshold) } else { default_value }
//! ```

mod engine;

pub(crate) use engine::{dynamic_to_json, json_to_dynamic};
pub use engine::{ExpressionScope, ScriptEngine};

use crate::error::{Result, StepFlowError};
use rhai::{Engine, AST};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A compiled expression that can be executed efficiently
#[derive(Clone)]
pub struct CompiledExpression {
    /// The compiled AST
    ast: AST,
    /// The original source code
    source: String,
    /// Name/identifier for this expression
    name: String,
}

impl CompiledExpression {
    /// Get the source code of this expression
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Get the name of this expression
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn ast(&self) -> &AST {
        &self.ast
    }
}

impl std::fmt::Debug for CompiledExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledExpression")
            .field("name", &self.name)
            .field("source", &self.source)
            .finish()
    }
}

/// Cache for compiled expressions to avoid recompilation
#[derive(Default)]
pub struct ScriptCache {
    /// Map from expression source to compiled expression
    pub(crate) cache: HashMap<String, CompiledExpression>,
}

impl ScriptCache {
    /// Create a new empty cache
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Get a cached expression or compile and cache it
    pub fn get_or_compile(
        &mut self,
        engine: &Engine,
        name: &str,
        source: &str,
    ) -> Result<CompiledExpression> {
        if let Some(expression) = self.cache.get(source) {
            return Ok(expression.clone());
        }

        let ast = engine
            .compile(source)
            .map_err(|e| StepFlowError::Script(format!("Compilation error: {}", e)))?;

        let expression = CompiledExpression {
            ast,
            source: source.to_string(),
            name: name.to_string(),
        };

        self.cache.insert(source.to_string(), expression.clone());
        Ok(expression)
    }

    /// Clear the cache
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// Thread-safe shared expression cache
pub type SharedScriptCache = Arc<RwLock<ScriptCache>>;
