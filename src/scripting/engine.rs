//! Rhai engine wrapper shared by column selection, row matching, limits and
//! the adaptive parameter overlay.
//!
//! One engine instance is built per generation run (or shared across runs via
//! the cache) with the same safety limits the surrounding application applies
//! to user scripts. All expression entry points are pure with respect to the
//! engine; per-evaluation state lives in an [`ExpressionScope`].

use crate::error::{Result, StepFlowError};
use crate::scripting::{CompiledExpression, ScriptCache, SharedScriptCache};
use rhai::{Dynamic, Engine, Map, Scope};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Per-evaluation variable bindings.
///
/// Thin builder over a [`rhai::Scope`]; annotation maps are exposed both as a
/// map variable and, where the name is a valid identifier, as individual
/// string variables so short expressions read naturally.
#[derive(Default)]
pub struct ExpressionScope {
    scope: Scope<'static>,
}

impl ExpressionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(mut self, name: &str, value: impl Into<String>) -> Self {
        self.scope.push(name.to_string(), value.into());
        self
    }

    pub fn push_bool(mut self, name: &str, value: bool) -> Self {
        self.scope.push(name.to_string(), value);
        self
    }

    pub fn push_int(mut self, name: &str, value: i64) -> Self {
        self.scope.push(name.to_string(), value);
        self
    }

    pub fn push_dynamic(mut self, name: &str, value: Dynamic) -> Self {
        self.scope.push_dynamic(name.to_string(), value);
        self
    }

    /// Bind a string map both as `name` and as loose identifier variables.
    pub fn push_annotations(mut self, name: &str, annotations: &BTreeMap<String, String>) -> Self {
        let mut map = Map::new();
        for (key, value) in annotations {
            map.insert(key.as_str().into(), value.clone().into());
            if is_identifier(key) {
                self.scope.push(key.clone(), value.clone());
            }
        }
        self.scope.push(name.to_string(), map);
        self
    }

    /// Bind a string map only as the `name` map variable.
    pub fn push_annotation_map(
        mut self,
        name: &str,
        annotations: &BTreeMap<String, String>,
    ) -> Self {
        let mut map = Map::new();
        for (key, value) in annotations {
            map.insert(key.as_str().into(), value.clone().into());
        }
        self.scope.push(name.to_string(), map);
        self
    }

    fn into_scope(self) -> Scope<'static> {
        self.scope
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The expression engine for step generation.
pub struct ScriptEngine {
    /// The Rhai engine instance
    engine: Engine,
    /// Cache of compiled expressions
    cache: SharedScriptCache,
}

impl ScriptEngine {
    /// Create a new script engine with default configuration
    pub fn new() -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self {
            engine,
            cache: Arc::new(RwLock::new(ScriptCache::new())),
        }
    }

    /// Create a new script engine with a shared cache
    pub fn with_cache(cache: SharedScriptCache) -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self { engine, cache }
    }

    /// Configure the Rhai engine with safety limits
    fn configure_engine(engine: &mut Engine) {
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(100_000);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(10_000);
        engine.set_max_map_size(1_000);
    }

    /// Compile an expression and cache it
    pub fn compile(&self, name: &str, source: &str) -> Result<CompiledExpression> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| StepFlowError::Script(format!("Failed to acquire cache lock: {}", e)))?;
        cache.get_or_compile(&self.engine, name, source)
    }

    /// Evaluate a compiled expression with the given scope
    pub fn eval_dynamic(
        &self,
        expression: &CompiledExpression,
        scope: ExpressionScope,
    ) -> Result<Dynamic> {
        let mut scope = scope.into_scope();
        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, expression.ast())
            .map_err(|e| {
                StepFlowError::Script(format!(
                    "Execution error in '{}': {}",
                    expression.name(),
                    e
                ))
            })
    }

    /// Evaluate a compiled expression as a boolean predicate.
    /// Integers are truthy when non-zero; other types are rejected.
    pub fn eval_bool(&self, expression: &CompiledExpression, scope: ExpressionScope) -> Result<bool> {
        let value = self.eval_dynamic(expression, scope)?;
        if let Ok(b) = value.as_bool() {
            return Ok(b);
        }
        if let Ok(i) = value.as_int() {
            return Ok(i != 0);
        }
        Err(StepFlowError::Script(format!(
            "Expression '{}' must return a boolean, got {}",
            expression.name(),
            value.type_name()
        )))
    }

    /// Filter `candidates` down to those for which `source` evaluates truthy,
    /// with the candidate bound as `value`.
    pub fn query_all(
        &self,
        name: &str,
        source: &str,
        candidates: impl IntoIterator<Item = String>,
    ) -> Result<Vec<String>> {
        let expression = self.compile(name, source)?;
        let mut selected = Vec::new();
        for candidate in candidates {
            let scope = ExpressionScope::new().push_str("value", candidate.clone());
            if self.eval_bool(&expression, scope)? {
                selected.push(candidate);
            }
        }
        Ok(selected)
    }

    /// Compile and evaluate in one step (for one-off expressions)
    pub fn eval(&self, source: &str, scope: ExpressionScope) -> Result<Dynamic> {
        let expression = self.compile("temp", source)?;
        self.eval_dynamic(&expression, scope)
    }

    /// Validate an expression without executing it
    pub fn validate(&self, source: &str) -> Result<()> {
        self.engine
            .compile(source)
            .map(|_| ())
            .map_err(|e| StepFlowError::Script(format!("Validation error: {}", e)))
    }

    /// Clear the expression cache
    pub fn clear_cache(&self) -> Result<()> {
        let mut cache = self
            .cache
            .write()
            .map_err(|e| StepFlowError::Script(format!("Failed to acquire cache lock: {}", e)))?;
        cache.clear();
        Ok(())
    }

    /// Get a reference to the shared cache
    pub fn cache(&self) -> &SharedScriptCache {
        &self.cache
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine")
            .field("cache_size", &self.cache.read().map(|c| c.cache.len()).ok())
            .finish()
    }
}

/// Convert an evaluated Rhai value to a JSON value.
/// Used by the adaptive parameter overlay to compare and assign parameters.
pub(crate) fn dynamic_to_json(value: &Dynamic) -> Result<serde_json::Value> {
    if value.is_unit() {
        return Ok(serde_json::Value::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(serde_json::Value::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(serde_json::Value::Number(i.into()));
    }
    if let Ok(f) = value.as_float() {
        return Ok(serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null));
    }
    if let Some(s) = value.read_lock::<rhai::ImmutableString>() {
        return Ok(serde_json::Value::String(s.to_string()));
    }
    if let Some(array) = value.read_lock::<rhai::Array>() {
        let mut items = Vec::with_capacity(array.len());
        for item in array.iter() {
            items.push(dynamic_to_json(item)?);
        }
        return Ok(serde_json::Value::Array(items));
    }
    if let Some(map) = value.read_lock::<rhai::Map>() {
        let mut object = serde_json::Map::new();
        for (key, item) in map.iter() {
            object.insert(key.to_string(), dynamic_to_json(item)?);
        }
        return Ok(serde_json::Value::Object(object));
    }
    Err(StepFlowError::Script(format!(
        "Cannot convert expression result of type {} to a parameter value",
        value.type_name()
    )))
}

/// Convert a JSON value into a Rhai value, for binding parameter defaults
/// into expression scopes.
pub(crate) fn json_to_dynamic(value: &serde_json::Value) -> Dynamic {
    match value {
        serde_json::Value::Null => Dynamic::UNIT,
        serde_json::Value::Bool(b) => Dynamic::from(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else {
                Dynamic::from(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => Dynamic::from(s.clone()),
        serde_json::Value::Array(items) => {
            let array: rhai::Array = items.iter().map(json_to_dynamic).collect();
            Dynamic::from(array)
        }
        serde_json::Value::Object(object) => {
            let mut map = Map::new();
            for (key, item) in object {
                map.insert(key.as_str().into(), json_to_dynamic(item));
            }
            Dynamic::from(map)
        }
    }
}
