//! Generic task trait for pipeline execution.

use async_trait::async_trait;
use podboot_shared::errors::PodbootResult;
use serde::{Deserialize, Serialize};

/// What happens to the pipeline when a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criticality {
    /// Failure aborts every remaining task and phase.
    #[default]
    Critical,
    /// Failure is logged and the pipeline continues.
    BestEffort,
}

/// Result of a task action that actually ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskOutput {
    /// Index of the alternative action that succeeded, for tasks that have them.
    pub alternative: Option<usize>,
}

impl TaskOutput {
    pub fn done() -> Self {
        Self::default()
    }

    pub fn via(alternative: usize) -> Self {
        Self {
            alternative: Some(alternative),
        }
    }
}

/// Trait for idempotent tasks executed by the pipeline.
///
/// The executor calls [`is_satisfied`](PipelineTask::is_satisfied) first and
/// only runs the action when the predicate says the work is not done yet.
/// Tasks run with a shared context, which is cloned per call.
#[async_trait]
pub trait PipelineTask<Ctx>: Send + Sync {
    /// Human-readable task name for logging and the boot journal.
    fn name(&self) -> &str;

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    /// Idempotence predicate: `true` when the action has nothing to do.
    async fn is_satisfied(&self, ctx: Ctx) -> PodbootResult<bool>;

    /// Called instead of `run` when the task is already satisfied or skipped.
    ///
    /// Tasks that contribute to shared context (e.g. PATH fragments) still
    /// need to do so when their action is not executed.
    async fn on_satisfied(&self, ctx: Ctx) -> PodbootResult<()>;

    /// Perform the task's action.
    async fn run(&self, ctx: Ctx) -> PodbootResult<TaskOutput>;
}

pub type BoxedTask<Ctx> = Box<dyn PipelineTask<Ctx>>;
