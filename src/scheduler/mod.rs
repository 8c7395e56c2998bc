//! Node run scheduler: turns generated iteration steps into executed work.
//!
//! A run is in exactly one of three modes:
//!
//! - **pass through**: the workload's pass-through hook runs once per
//!   generated step, forwarding that step's data instead of iterating;
//! - **sequential**: steps run in sorted order on the calling thread;
//! - **parallel**: step tasks are batched onto a worker pool, either borrowed
//!   from the run context or created locally and torn down afterwards.
//!
//! Adaptive parameters mutate shared node state, so a run with adaptive
//! overrides is forced sequential regardless of the parallelization flags.
//! Cancellation is polled before each step; it stops the run early without
//! being an error. A parallel run waits for every dispatched task and then
//! re-raises the first captured failure.

pub mod pool;

pub use pool::{PoolHandle, Task, TaskHandle, WorkerPool};

use crate::adaptive::{AdaptiveParameterSettings, ParameterRestoreGuard, SharedParameters};
use crate::annotation::TextAnnotation;
use crate::error::{Result, StepFlowError};
use crate::matching::{ColumnMatching, GroupingConfig};
use crate::progress::ProgressInfo;
use crate::scripting::ScriptEngine;
use crate::slot::Slot;
use crate::step::{generate_steps, IterationContext, IterationStep};
use std::sync::Arc;

/// How a node groups its input rows into steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupingMode {
    /// At most one row per slot per step.
    Single,
    /// Rows sharing reference values merge into one step.
    #[default]
    Merging,
    /// All rows form one single step.
    MergeAll,
}

/// Static execution capabilities of a node.
#[derive(Debug, Clone)]
pub struct NodeCapabilities {
    pub grouping_mode: GroupingMode,
    pub pass_through_enabled: bool,
    pub supports_parallelization: bool,
    pub parallelization_enabled: bool,
    /// Steps dispatched per worker-pool job in a parallel run.
    pub batch_size: usize,
    /// Run once with an empty step when all (optional) inputs are empty.
    pub allows_empty_iteration: bool,
}

impl Default for NodeCapabilities {
    fn default() -> Self {
        Self {
            grouping_mode: GroupingMode::default(),
            pass_through_enabled: false,
            supports_parallelization: false,
            parallelization_enabled: true,
            batch_size: 1,
            allows_empty_iteration: false,
        }
    }
}

/// Per-run environment: threading and progress.
#[derive(Clone)]
pub struct RunContext {
    /// Pool shared by the surrounding run, if any. Without one, a parallel
    /// run creates (and tears down) its own.
    pub pool: Option<Arc<WorkerPool>>,
    pub parallelization_enabled: bool,
    /// Thread count for a locally created pool.
    pub num_threads: usize,
    pub progress: ProgressInfo,
}

impl RunContext {
    pub fn new() -> Self {
        Self {
            pool: None,
            parallelization_enabled: true,
            num_threads: 1,
            progress: ProgressInfo::new(),
        }
    }

    pub fn with_pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    pub fn with_progress(mut self, progress: ProgressInfo) -> Self {
        self.progress = progress;
        self
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// The work a node performs, one call per iteration step.
#[cfg_attr(test, mockall::automock)]
pub trait NodeWorkload {
    fn run_iteration(
        &self,
        step: &IterationStep,
        context: IterationContext,
        progress: &ProgressInfo,
    ) -> Result<()>;

    /// Invoked once per step instead of `run_iteration` when pass-through is
    /// enabled; forwards the step's data unchanged.
    fn run_pass_through(&self, step: &IterationStep, progress: &ProgressInfo) -> Result<()>;
}

/// Everything describing one node run besides the workload itself.
pub struct NodeRun<'a> {
    pub slots: &'a [Slot],
    pub grouping: &'a GroupingConfig,
    pub capabilities: &'a NodeCapabilities,
    pub adaptive: &'a AdaptiveParameterSettings,
    pub parameters: SharedParameters,
    /// Annotations attached to every generated step, e.g. from an outer
    /// parameter sweep.
    pub parameter_annotations: &'a [TextAnnotation],
}

impl<'a> NodeRun<'a> {
    /// The grouping configuration with the node's grouping mode applied.
    fn effective_grouping(&self) -> GroupingConfig {
        let mut config = self.grouping.clone();
        match self.capabilities.grouping_mode {
            GroupingMode::Single => config.apply_merging = false,
            GroupingMode::Merging => config.apply_merging = true,
            GroupingMode::MergeAll => config.column_matching = ColumnMatching::MergeAll,
        }
        config
    }
}

/// Execute a node run end to end: generate steps, pick the execution mode,
/// run the workload.
pub fn run(
    workload: Arc<dyn NodeWorkload + Send + Sync>,
    node: &NodeRun<'_>,
    engine: &ScriptEngine,
    context: &RunContext,
) -> Result<()> {
    let progress = &context.progress;
    let config = node.effective_grouping();
    let generated = generate_steps(
        node.slots,
        &config,
        node.parameter_annotations,
        engine,
        progress,
        node.capabilities.allows_empty_iteration,
    )?;
    let steps = generated.steps;
    if steps.is_empty() {
        progress.log("No iteration steps, nothing to run");
        return Ok(());
    }

    if node.capabilities.pass_through_enabled {
        return run_pass_through(workload, steps, progress);
    }

    let adaptive = node.adaptive.is_enabled();
    // A single worker gains nothing over the sequential path and would lose
    // its immediate failure propagation.
    let workers = context
        .pool
        .as_ref()
        .map_or(context.num_threads, |pool| pool.thread_count());
    let parallel = node.capabilities.supports_parallelization
        && node.capabilities.parallelization_enabled
        && context.parallelization_enabled
        && !adaptive
        && workers > 1
        && steps.len() > 1;
    if adaptive && node.capabilities.supports_parallelization {
        progress.log("Adaptive parameters force sequential execution");
    }

    if parallel {
        run_parallel(workload, steps, node, context)
    } else {
        run_sequential(workload, steps, node, engine, progress)
    }
}

/// Forward each step's data through the pass-through hook without running
/// any iteration work.
fn run_pass_through(
    workload: Arc<dyn NodeWorkload + Send + Sync>,
    steps: Vec<IterationStep>,
    progress: &ProgressInfo,
) -> Result<()> {
    let total = steps.len();
    progress.log(&format!("Pass through enabled, forwarding {total} step(s)"));
    for (index, step) in steps.into_iter().enumerate() {
        if progress.is_cancelled() {
            progress.log(&format!(
                "Cancelled after {index} of {total} step(s), stopping"
            ));
            break;
        }
        workload
            .run_pass_through(&step, progress)
            .map_err(|error| StepFlowError::StepFailed {
                step_index: index,
                source: Box::new(error),
            })?;
    }
    Ok(())
}

fn run_sequential(
    workload: Arc<dyn NodeWorkload + Send + Sync>,
    steps: Vec<IterationStep>,
    node: &NodeRun<'_>,
    engine: &ScriptEngine,
    progress: &ProgressInfo,
) -> Result<()> {
    let total = steps.len();
    // One snapshot per run; the guard restores on every exit path.
    let guard = if node.adaptive.is_enabled() {
        Some(ParameterRestoreGuard::new(&node.parameters)?)
    } else {
        None
    };
    for (index, mut step) in steps.into_iter().enumerate() {
        if progress.is_cancelled() {
            progress.log(&format!(
                "Cancelled after {index} of {total} step(s), stopping"
            ));
            break;
        }
        let step_progress =
            progress.resolve_and_log(&format!("Iteration step {}/{}", index + 1, total));
        if guard.is_some() {
            node.adaptive
                .apply_to_step(&node.parameters, &mut step, engine, &step_progress)?;
        }
        workload
            .run_iteration(&step, IterationContext { index, total }, &step_progress)
            .map_err(|error| StepFlowError::StepFailed {
                step_index: index,
                source: Box::new(error),
            })?;
    }
    Ok(())
}

fn run_parallel(
    workload: Arc<dyn NodeWorkload + Send + Sync>,
    steps: Vec<IterationStep>,
    node: &NodeRun<'_>,
    context: &RunContext,
) -> Result<()> {
    let progress = &context.progress;
    let pool = match &context.pool {
        Some(shared) => PoolHandle::Borrowed(shared.clone()),
        None => PoolHandle::Owned(WorkerPool::new(context.num_threads)?),
    };
    progress.log(&format!(
        "Parallel execution on {} worker thread(s)",
        pool.pool().thread_count()
    ));

    let total = steps.len();
    let tasks: Vec<Task> = steps
        .into_iter()
        .enumerate()
        .map(|(index, step)| {
            let workload = workload.clone();
            let step_progress = progress.resolve(&format!("Iteration step {}/{}", index + 1, total));
            Box::new(move || {
                if step_progress.is_cancelled() {
                    return Ok(());
                }
                step_progress.log("Starting");
                workload
                    .run_iteration(&step, IterationContext { index, total }, &step_progress)
                    .map_err(|error| StepFlowError::StepFailed {
                        step_index: index,
                        source: Box::new(error),
                    })
            }) as Task
        })
        .collect();

    let handles = pool
        .pool()
        .schedule_batches(tasks, node.capabilities.batch_size)?;
    // Wait for every batch before raising anything; siblings of a failed
    // step are not cancelled.
    let mut first_failure = None;
    for handle in handles {
        if let Some(failure) = handle.join() {
            first_failure.get_or_insert(failure);
        }
    }
    // An owned pool is dropped (and joined) here; a borrowed one is left alone.
    drop(pool);
    match first_failure {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::TextAnnotation;
    use crate::slot::{SlotInfo, SlotRow};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct CountingWorkload {
        iterations: AtomicUsize,
        pass_throughs: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    impl CountingWorkload {
        fn new() -> Self {
            Self {
                iterations: AtomicUsize::new(0),
                pass_throughs: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl NodeWorkload for CountingWorkload {
        fn run_iteration(
            &self,
            step: &IterationStep,
            _context: IterationContext,
            _progress: &ProgressInfo,
        ) -> Result<()> {
            self.iterations.fetch_add(1, Ordering::SeqCst);
            if let Some(value) = step.text_annotation("x") {
                self.seen.lock().unwrap().push(value.to_string());
            }
            Ok(())
        }

        fn run_pass_through(&self, step: &IterationStep, _progress: &ProgressInfo) -> Result<()> {
            self.pass_throughs.fetch_add(1, Ordering::SeqCst);
            if let Some(value) = step.text_annotation("x") {
                self.seen.lock().unwrap().push(value.to_string());
            }
            Ok(())
        }
    }

    fn slot_with_values(name: &str, values: &[&str]) -> Slot {
        let mut slot = Slot::new(name, SlotInfo::default());
        for value in values {
            let mut row = SlotRow::new(json!(null));
            row.text_annotations.push(TextAnnotation::new("x", *value));
            slot.push_row(row);
        }
        slot
    }

    fn node_run<'a>(
        slots: &'a [Slot],
        grouping: &'a GroupingConfig,
        capabilities: &'a NodeCapabilities,
        adaptive: &'a AdaptiveParameterSettings,
    ) -> NodeRun<'a> {
        NodeRun {
            slots,
            grouping,
            capabilities,
            adaptive,
            parameters: SharedParameters::default(),
            parameter_annotations: &[],
        }
    }

    #[test]
    fn test_sequential_runs_steps_in_order() {
        let slots = vec![slot_with_values("a", &["2", "1", "3"])];
        let grouping = GroupingConfig {
            column_matching: ColumnMatching::Union,
            ..GroupingConfig::default()
        };
        let capabilities = NodeCapabilities {
            grouping_mode: GroupingMode::Single,
            ..NodeCapabilities::default()
        };
        let adaptive = AdaptiveParameterSettings::default();
        let workload = Arc::new(CountingWorkload::new());
        run(
            workload.clone(),
            &node_run(&slots, &grouping, &capabilities, &adaptive),
            &ScriptEngine::new(),
            &RunContext::new(),
        )
        .unwrap();
        assert_eq!(workload.iterations.load(Ordering::SeqCst), 3);
        assert_eq!(*workload.seen.lock().unwrap(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_pass_through_forwards_each_step() {
        let slots = vec![slot_with_values("a", &["2", "1", "3"])];
        let grouping = GroupingConfig {
            column_matching: ColumnMatching::Union,
            ..GroupingConfig::default()
        };
        let capabilities = NodeCapabilities {
            pass_through_enabled: true,
            ..NodeCapabilities::default()
        };
        let adaptive = AdaptiveParameterSettings::default();
        let workload = Arc::new(CountingWorkload::new());
        run(
            workload.clone(),
            &node_run(&slots, &grouping, &capabilities, &adaptive),
            &ScriptEngine::new(),
            &RunContext::new(),
        )
        .unwrap();
        assert_eq!(workload.iterations.load(Ordering::SeqCst), 0);
        assert_eq!(workload.pass_throughs.load(Ordering::SeqCst), 3);
        assert_eq!(*workload.seen.lock().unwrap(), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_single_worker_falls_back_to_sequential() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut workload = MockNodeWorkload::new();
        let counted = calls.clone();
        workload.expect_run_iteration().returning(move |_, context, _| {
            counted.fetch_add(1, Ordering::SeqCst);
            if context.index == 0 {
                Err(StepFlowError::Workload("boom".to_string()))
            } else {
                Ok(())
            }
        });
        let slots = vec![slot_with_values("a", &["1", "2", "3"])];
        let grouping = GroupingConfig {
            column_matching: ColumnMatching::Union,
            ..GroupingConfig::default()
        };
        let capabilities = NodeCapabilities {
            supports_parallelization: true,
            grouping_mode: GroupingMode::Single,
            ..NodeCapabilities::default()
        };
        let adaptive = AdaptiveParameterSettings::default();
        // A default context has no pool and one thread: the run must take
        // the sequential path and stop at the first failure.
        let error = run(
            Arc::new(workload),
            &node_run(&slots, &grouping, &capabilities, &adaptive),
            &ScriptEngine::new(),
            &RunContext::new(),
        )
        .unwrap_err();
        match error {
            StepFlowError::StepFailed { step_index, .. } => assert_eq!(step_index, 0),
            other => panic!("unexpected error: {other}"),
        }
        // Later steps never ran.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sequential_failure_carries_step_index() {
        let mut workload = MockNodeWorkload::new();
        workload
            .expect_run_iteration()
            .returning(|_, context, _| {
                if context.index == 1 {
                    Err(StepFlowError::Workload("boom".to_string()))
                } else {
                    Ok(())
                }
            });
        let slots = vec![slot_with_values("a", &["1", "2", "3"])];
        let grouping = GroupingConfig {
            column_matching: ColumnMatching::Union,
            ..GroupingConfig::default()
        };
        let capabilities = NodeCapabilities {
            grouping_mode: GroupingMode::Single,
            ..NodeCapabilities::default()
        };
        let adaptive = AdaptiveParameterSettings::default();
        let error = run(
            Arc::new(workload),
            &node_run(&slots, &grouping, &capabilities, &adaptive),
            &ScriptEngine::new(),
            &RunContext::new(),
        )
        .unwrap_err();
        match error {
            StepFlowError::StepFailed { step_index, .. } => assert_eq!(step_index, 1),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_merge_all_mode_runs_once() {
        let slots = vec![slot_with_values("a", &["1", "2", "3"])];
        let grouping = GroupingConfig::default();
        let capabilities = NodeCapabilities {
            grouping_mode: GroupingMode::MergeAll,
            ..NodeCapabilities::default()
        };
        let adaptive = AdaptiveParameterSettings::default();
        let workload = Arc::new(CountingWorkload::new());
        run(
            workload.clone(),
            &node_run(&slots, &grouping, &capabilities, &adaptive),
            &ScriptEngine::new(),
            &RunContext::new(),
        )
        .unwrap();
        assert_eq!(workload.iterations.load(Ordering::SeqCst), 1);
    }
}
