//! Structured validation reports.
//!
//! Configuration and data-shape problems are collected into a report before
//! any step runs. Each entry carries a severity and a three-part message
//! (what failed, why, how to fix it) so that users configuring iteration
//! strategies get actionable feedback instead of a bare stack trace.

use crate::error::StepFlowError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity of a validation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Warning => write!(f, "WARN"),
            Severity::Error => write!(f, "ERROR"),
        }
    }
}

/// One validation finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationEntry {
    pub severity: Severity,
    /// What failed.
    pub title: String,
    /// Why it failed.
    pub explanation: String,
    /// How to fix it.
    pub fix: String,
}

impl ValidationEntry {
    pub fn new(
        severity: Severity,
        title: impl Into<String>,
        explanation: impl Into<String>,
        fix: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            title: title.into(),
            explanation: explanation.into(),
            fix: fix.into(),
        }
    }

    pub fn error(
        title: impl Into<String>,
        explanation: impl Into<String>,
        fix: impl Into<String>,
    ) -> Self {
        Self::new(Severity::Error, title, explanation, fix)
    }
}

impl fmt::Display for ValidationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}\n  Why: {}\n  Fix: {}",
            self.severity, self.title, self.explanation, self.fix
        )
    }
}

/// A collection of validation findings for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    entries: Vec<ValidationEntry>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ValidationEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ValidationEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|e| e.severity == Severity::Error)
    }

    /// Convert into `Err(StepFlowError::Validation)` if any entry is an error.
    pub fn into_result(self) -> Result<(), StepFlowError> {
        if self.has_errors() {
            Err(StepFlowError::Validation(self))
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", entry)?;
        }
        Ok(())
    }
}
