//! # StepFlow-RS: Iteration Step Scheduling for Node Pipelines
//!
//! Generates and executes the iteration steps of a node in a data-flow
//! pipeline: rows from the node's input slots are matched into groups by
//! their annotations, each group becomes one iteration step, and the steps
//! are run sequentially or on a worker pool.
//!
//! ## Architecture
//!
//! - **Matching**: reference column selection plus two interchangeable
//!   solvers (hash-join dictionary, layered flow graph)
//! - **Steps**: annotation merging, canonical ordering, completeness policy,
//!   index-range limiting
//! - **Scheduler**: pass-through / sequential / parallel execution with
//!   cooperative cancellation and guaranteed pool teardown
//! - **Scripting**: Rhai expressions for custom matching, step limits and
//!   adaptive parameter overrides
//!
//! ## Example
//!
//! ```
//! use stepflow_rs::annotation::TextAnnotation;
//! use stepflow_rs::matching::GroupingConfig;
//! use stepflow_rs::progress::ProgressInfo;
//! use stepflow_rs::scripting::ScriptEngine;
//! use stepflow_rs::slot::{Slot, SlotInfo, SlotRow};
//! use stepflow_rs::step::generate_steps;
//!
//! let mut images = Slot::new("images", SlotInfo::default());
//! let mut masks = Slot::new("masks", SlotInfo::default());
//! for sample in ["a", "b"] {
//!     let mut row = SlotRow::new(serde_json::json!(null));
//!     row.text_annotations.push(TextAnnotation::new("#sample", sample));
//!     images.push_row(row.clone());
//!     masks.push_row(row);
//! }
//!
//! let result = generate_steps(
//!     &[images, masks],
//!     &GroupingConfig::default(),
//!     &[],
//!     &ScriptEngine::new(),
//!     &ProgressInfo::new(),
//!     false,
//! )
//! .unwrap();
//! assert_eq!(result.steps.len(), 2);
//! ```

pub mod adaptive;
pub mod annotation;
pub mod error;
pub mod limit;
pub mod matching;
pub mod progress;
pub mod scheduler;
pub mod scripting;
pub mod slot;
pub mod step;
pub mod validation;

pub use error::{Result, StepFlowError};
