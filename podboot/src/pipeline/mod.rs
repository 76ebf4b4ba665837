//! Generic phase-ordered pipeline execution framework.
//!
//! This module provides the step runner used by the init phase:
//! - Tasks grouped into stages keyed by a numeric [`Phase`]
//! - Stages executed in ascending phase order, tasks in declaration order
//! - Every task result classified at the point of execution
//!
//! ## Architecture
//!
//! ```text
//! Pipeline → Stages (by phase) → Tasks
//!
//! - Pipeline: Orchestrates execution of all stages
//! - Stage: Tasks sharing a phase, run sequentially
//! - Task: Idempotent unit of work (predicate + action)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use pipeline::{ExecutionPlan, NoopObserver, Phase, PipelineBuilder, PipelineExecutor};
//!
//! let plan = ExecutionPlan::from_tasks(vec![
//!     (Phase::ENVIRONMENT, Box::new(TaskA) as BoxedTask<Ctx>),
//!     (Phase::PACKAGES, Box::new(TaskB)),
//! ]);
//!
//! let pipeline = PipelineBuilder::from_plan(plan);
//! let report = PipelineExecutor::execute(pipeline, ctx, &NoopObserver).await;
//! println!("pipeline took {}ms", report.metrics.total_duration_ms);
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;
mod task;

pub use metrics::{PipelineMetrics, PipelineReport, StageMetrics, TaskMetrics, TaskStatus};
pub use pipeline::{
    ExecutionPlan, NoopObserver, Pipeline, PipelineBuilder, PipelineExecutor, PipelineObserver,
};
pub use stage::{Phase, Stage};
pub use task::{BoxedTask, Criticality, PipelineTask, TaskOutput};
