//! Thread pool for parallel step execution.
//!
//! Workers pull boxed jobs from a shared crossbeam channel. Step tasks are
//! submitted in batches: one job runs a whole batch sequentially and reports
//! its first failure through a per-batch result channel. Dropping the pool
//! closes the channel and joins every worker.

use crate::error::{Result, StepFlowError};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fallible unit of work scheduled on the pool.
pub type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        let (sender, receiver) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let receiver: Receiver<Job> = receiver.clone();
            let worker = std::thread::Builder::new()
                .name(format!("stepflow-worker-{index}"))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        job();
                    }
                })?;
            workers.push(worker);
        }
        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    fn submit(&self, job: Job) -> Result<()> {
        match &self.sender {
            Some(sender) => sender
                .send(job)
                .map_err(|_| StepFlowError::Channel("Worker pool is shut down".to_string())),
            None => Err(StepFlowError::Channel(
                "Worker pool is shut down".to_string(),
            )),
        }
    }

    /// Schedule `tasks` in batches of `batch_size`, returning one handle per
    /// batch. A batch runs its tasks in order and stops at the first failure.
    pub fn schedule_batches(&self, tasks: Vec<Task>, batch_size: usize) -> Result<Vec<TaskHandle>> {
        let batch_size = batch_size.max(1);
        let mut handles = Vec::new();
        let mut tasks = tasks.into_iter().peekable();
        while tasks.peek().is_some() {
            let batch: Vec<Task> = tasks.by_ref().take(batch_size).collect();
            let (sender, receiver) = bounded::<Option<StepFlowError>>(1);
            self.submit(Box::new(move || {
                let mut failure = None;
                for task in batch {
                    if let Err(error) = task() {
                        failure = Some(error);
                        break;
                    }
                }
                let _ = sender.send(failure);
            }))?;
            handles.push(TaskHandle { receiver });
        }
        Ok(handles)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets each worker drain and exit.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Handle to one scheduled batch.
pub struct TaskHandle {
    receiver: Receiver<Option<StepFlowError>>,
}

impl TaskHandle {
    /// Block until the batch finished; returns its first failure, if any.
    pub fn join(self) -> Option<StepFlowError> {
        match self.receiver.recv() {
            Ok(failure) => failure,
            // The result sender was dropped without reporting: a task panicked.
            Err(_) => Some(StepFlowError::Workload(
                "A step task panicked before reporting a result".to_string(),
            )),
        }
    }
}

/// Who owns the pool a run executes on. Dropping an owned pool tears it
/// down; a borrowed pool outlives the run untouched.
pub enum PoolHandle {
    Owned(WorkerPool),
    Borrowed(Arc<WorkerPool>),
}

impl PoolHandle {
    pub fn pool(&self) -> &WorkerPool {
        match self {
            PoolHandle::Owned(pool) => pool,
            PoolHandle::Borrowed(pool) => pool,
        }
    }
}
