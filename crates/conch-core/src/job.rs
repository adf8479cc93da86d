//! Deferred jobs and the sandbox they run in
//!
//! Work that must not run where it is triggered (finalization cleanup above
//! all, since it is discovered during a collection) is queued as a [`Job`]
//! and run at [`crate::Context::drain_jobs`].

use std::collections::VecDeque;

use conch_gc::GcHeader;

use crate::context::Context;
use crate::error::{VmError, VmResult};
use crate::function::Arguments;
use crate::object::ObjectRef;
use crate::value::Value;

/// A unit of deferred work
#[derive(Debug)]
pub enum Job {
    /// Call `callee` with `this` and `args`
    Call {
        /// Function to call
        callee: Value,
        /// Receiver
        this: Value,
        /// Arguments
        args: Arguments,
    },
    /// Run the cleanup callbacks of a finalization registry
    FinalizationCleanup {
        /// Registry with pending cells
        registry: ObjectRef,
    },
}

impl Job {
    /// Every value the job will touch when run
    pub(crate) fn values(&self) -> Vec<Value> {
        match self {
            Job::Call { callee, this, args } => [*callee, *this].into_iter().chain(args.iter().copied()).collect(),
            Job::FinalizationCleanup { registry } => vec![Value::object(*registry)],
        }
    }

    pub(crate) fn run(self, ctx: &mut Context) -> VmResult<Value> {
        match self {
            Job::Call { callee, this, args } => ctx.call(callee, this, &args),
            Job::FinalizationCleanup { registry } => crate::finalization_registry::run_cleanup_job(ctx, registry),
        }
    }
}

/// FIFO of pending jobs; every queued value is a root.
#[derive(Debug, Default)]
pub struct JobQueue {
    jobs: VecDeque<Job>,
}

impl JobQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a job
    pub fn enqueue(&mut self, job: Job) {
        self.jobs.push_back(job);
    }

    /// Take the oldest job
    pub fn pop(&mut self) -> Option<Job> {
        self.jobs.pop_front()
    }

    /// Number of queued jobs
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no job is queued
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drop every queued job
    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    pub(crate) fn trace(&self, roots: &mut Vec<*const GcHeader>) {
        for job in &self.jobs {
            roots.extend(job.values().iter().filter_map(Value::as_header));
        }
    }
}

// ============================================================================
// SandBox
// ============================================================================

/// Outcome of a sandboxed run
#[derive(Debug)]
pub enum SandBoxResult {
    /// Completed normally
    Normal(Value),
    /// Threw; the native frame stack was restored
    Error(VmError),
}

impl SandBoxResult {
    /// Whether the run threw
    pub fn is_error(&self) -> bool {
        matches!(self, SandBoxResult::Error(_))
    }

    /// Back to a plain result
    pub fn into_result(self) -> VmResult<Value> {
        match self {
            SandBoxResult::Normal(value) => Ok(value),
            SandBoxResult::Error(error) => Err(error),
        }
    }
}

/// Isolated execution boundary: an error raised inside does not escape, and
/// the native frame stack is restored to its depth at entry.
pub struct SandBox;

impl SandBox {
    /// Run `f`, catching any thrown error.
    pub fn run(ctx: &mut Context, f: impl FnOnce(&mut Context) -> VmResult<Value>) -> SandBoxResult {
        let depth = ctx.frame_depth();
        let result = f(ctx);
        ctx.truncate_frames(depth);
        match result {
            Ok(value) => SandBoxResult::Normal(value),
            Err(error) => SandBoxResult::Error(error),
        }
    }
}
