//! Error handling for the step generation and scheduling core.
//!
//! This module defines custom error types and a Result alias for use
//! throughout the crate.

use crate::validation::ValidationReport;
use thiserror::Error;

/// Main error type for stepflow operations
#[derive(Error, Debug)]
pub enum StepFlowError {
    /// Errors related to Rhai expression compilation or execution
    #[error("Script error: {0}")]
    Script(String),

    /// Validation failures discovered before any step runs
    #[error("Validation failed:\n{0}")]
    Validation(ValidationReport),

    /// Errors related to configuration loading
    #[error("Configuration error: {0}")]
    Config(String),

    /// A step's adaptive parameter value could not be coerced into the
    /// target parameter's type
    #[error("Adaptive parameter '{key}' type error: {message}")]
    AdaptiveType { key: String, message: String },

    /// A workload failure captured while a step was running
    #[error("Step {step_index} failed: {source}")]
    StepFailed {
        step_index: usize,
        #[source]
        source: Box<StepFlowError>,
    },

    /// A workload failure surfaced by the node implementation
    #[error("Workload error: {0}")]
    Workload(String),

    /// Errors related to channel communication
    #[error("Channel error: {0}")]
    Channel(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<StepFlowError>,
    },
}

impl StepFlowError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        StepFlowError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        StepFlowError::Script(err.to_string())
    }
}

/// Result type alias for stepflow operations
pub type Result<T> = std::result::Result<T, StepFlowError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| StepFlowError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| StepFlowError::from_rhai_error(e).with_context(f()))
    }
}
