//! Generic pipeline execution framework.
//!
//! Provides a phase-ordered pipeline executor that runs each stage's tasks
//! sequentially and classifies every task result before deciding whether to
//! continue.

use super::metrics::{PipelineMetrics, PipelineReport, StageMetrics, TaskMetrics, TaskStatus};
use super::stage::{Phase, Stage};
use super::task::{BoxedTask, Criticality};
use podboot_shared::errors::{PodbootError, PodbootResult};
use std::collections::BTreeMap;
use std::time::Instant;

pub struct ExecutionPlan<Ctx> {
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    /// Build a plan from explicit stages, ordered by phase.
    ///
    /// Stages sharing a phase are merged, keeping declaration order.
    pub fn new(stages: Vec<Stage<BoxedTask<Ctx>>>) -> Self {
        let mut by_phase: BTreeMap<Phase, Vec<BoxedTask<Ctx>>> = BTreeMap::new();
        for stage in stages {
            by_phase.entry(stage.phase).or_default().extend(stage.tasks);
        }
        Self {
            stages: by_phase
                .into_iter()
                .map(|(phase, tasks)| Stage::new(phase, tasks))
                .collect(),
        }
    }

    /// Build a plan from `(phase, task)` pairs in declaration order.
    pub fn from_tasks(tasks: Vec<(Phase, BoxedTask<Ctx>)>) -> Self {
        Self::new(
            tasks
                .into_iter()
                .map(|(phase, task)| Stage::new(phase, vec![task]))
                .collect(),
        )
    }

    pub fn stages(self) -> Vec<Stage<BoxedTask<Ctx>>> {
        self.stages
    }

    /// Task names in execution order.
    pub fn task_names(&self) -> Vec<(Phase, String)> {
        self.stages
            .iter()
            .flat_map(|s| s.tasks.iter().map(|t| (s.phase, t.name().to_string())))
            .collect()
    }
}

pub struct Pipeline<Ctx> {
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> Pipeline<Ctx> {
    pub fn new(stages: Vec<Stage<BoxedTask<Ctx>>>) -> Self {
        Self { stages }
    }
}

pub struct PipelineBuilder;

impl PipelineBuilder {
    pub fn from_plan<Ctx>(plan: ExecutionPlan<Ctx>) -> Pipeline<Ctx> {
        Pipeline::new(plan.stages())
    }
}

/// Hooks the executor calls around each task.
pub trait PipelineObserver: Send + Sync {
    /// Return true to skip a task without evaluating its predicate.
    fn should_skip(&self, _task: &str) -> bool {
        false
    }

    /// Called once per task with its final classification.
    fn record(&self, _task: &TaskMetrics) {}
}

/// Observer that never skips and records nothing.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Pipeline executor framework.
///
/// This provides the generic infrastructure for executing a phase-ordered
/// pipeline. The actual task logic is provided by task implementations.
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Execute a pipeline.
    ///
    /// Iterates through stages in phase order and runs each task once.
    /// A critical failure stops execution immediately; nothing after the
    /// failing task runs. Never returns an error: the outcome of every task
    /// is in the report.
    ///
    /// Generic over:
    /// - `Ctx`: Shared pipeline context (use interior mutability for writes)
    pub async fn execute<Ctx>(
        pipeline: Pipeline<Ctx>,
        ctx: Ctx,
        observer: &dyn PipelineObserver,
    ) -> PipelineReport
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut stage_metrics = Vec::new();
        let mut critical_failure = None;

        for stage in pipeline.stages {
            let phase = stage.phase;
            let stage_start = Instant::now();
            let mut task_metrics = Vec::new();

            tracing::debug!(phase = %phase, tasks = stage.tasks.len(), "Entering phase");

            for task in stage.tasks {
                let name = task.name().to_string();
                let task_start = Instant::now();

                let status = match Self::run_task(&task, ctx.clone(), observer).await {
                    Ok(status) => status,
                    Err(e) => TaskStatus::Failed {
                        criticality: task.criticality(),
                        error: e.to_string(),
                    },
                };

                match &status {
                    TaskStatus::Satisfied => {
                        tracing::info!(step = %name, phase = %phase, "Step already satisfied, no-op")
                    }
                    TaskStatus::Skipped => {
                        tracing::info!(step = %name, phase = %phase, "Step completed in an earlier boot, skipped")
                    }
                    TaskStatus::Completed { alternative } => {
                        tracing::info!(step = %name, phase = %phase, alternative = ?alternative, "Step completed")
                    }
                    TaskStatus::Failed {
                        criticality: Criticality::BestEffort,
                        error,
                    } => {
                        tracing::warn!(step = %name, phase = %phase, classification = "best_effort", "Step failed, continuing: {}", error)
                    }
                    TaskStatus::Failed {
                        criticality: Criticality::Critical,
                        error,
                    } => {
                        tracing::error!(step = %name, phase = %phase, classification = "critical", "Step failed, aborting init: {}", error);
                        critical_failure = Some(PodbootError::CriticalInitFailure {
                            step: name.clone(),
                            phase: phase.0,
                            message: error.clone(),
                        });
                    }
                }

                let metrics = TaskMetrics {
                    name,
                    phase,
                    status,
                    duration_ms: task_start.elapsed().as_millis(),
                };
                observer.record(&metrics);
                task_metrics.push(metrics);

                if critical_failure.is_some() {
                    break;
                }
            }

            stage_metrics.push(StageMetrics {
                phase,
                duration_ms: stage_start.elapsed().as_millis(),
                tasks: task_metrics,
            });

            if critical_failure.is_some() {
                break;
            }
        }

        PipelineReport {
            metrics: PipelineMetrics {
                total_duration_ms: total_start.elapsed().as_millis(),
                stages: stage_metrics,
            },
            critical_failure,
        }
    }

    async fn run_task<Ctx: Clone>(
        task: &BoxedTask<Ctx>,
        ctx: Ctx,
        observer: &dyn PipelineObserver,
    ) -> PodbootResult<TaskStatus> {
        if observer.should_skip(task.name()) {
            task.on_satisfied(ctx).await?;
            return Ok(TaskStatus::Skipped);
        }

        if task.is_satisfied(ctx.clone()).await? {
            task.on_satisfied(ctx).await?;
            return Ok(TaskStatus::Satisfied);
        }

        let output = task.run(ctx).await?;
        Ok(TaskStatus::Completed {
            alternative: output.alternative,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{PipelineTask, TaskOutput};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recorder {
        name: &'static str,
        criticality: Criticality,
        fail: bool,
        done: Mutex<bool>,
    }

    impl Recorder {
        fn ok(name: &'static str) -> Box<Self> {
            Box::new(Self {
                name,
                criticality: Criticality::Critical,
                fail: false,
                done: Mutex::new(false),
            })
        }

        fn failing(name: &'static str, criticality: Criticality) -> Box<Self> {
            Box::new(Self {
                name,
                criticality,
                fail: true,
                done: Mutex::new(false),
            })
        }
    }

    #[async_trait]
    impl PipelineTask<Log> for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn criticality(&self) -> Criticality {
            self.criticality
        }

        async fn is_satisfied(&self, _ctx: Log) -> PodbootResult<bool> {
            Ok(*self.done.lock())
        }

        async fn on_satisfied(&self, _ctx: Log) -> PodbootResult<()> {
            Ok(())
        }

        async fn run(&self, ctx: Log) -> PodbootResult<TaskOutput> {
            ctx.lock().push(self.name.to_string());
            if self.fail {
                return Err(PodbootError::step(self.name, "boom"));
            }
            *self.done.lock() = true;
            Ok(TaskOutput::done())
        }
    }

    fn plan(tasks: Vec<(Phase, BoxedTask<Log>)>) -> Pipeline<Log> {
        PipelineBuilder::from_plan(ExecutionPlan::from_tasks(tasks))
    }

    #[tokio::test]
    async fn test_phases_ascending_then_declaration_order() {
        let log: Log = Arc::default();
        let pipeline = plan(vec![
            (Phase(30), Recorder::ok("c")),
            (Phase(10), Recorder::ok("a1")),
            (Phase(20), Recorder::ok("b")),
            (Phase(10), Recorder::ok("a2")),
        ]);

        let report = PipelineExecutor::execute(pipeline, log.clone(), &NoopObserver).await;

        assert!(!report.is_aborted());
        assert_eq!(*log.lock(), vec!["a1", "a2", "b", "c"]);
        assert_eq!(report.metrics.stages.len(), 3);
    }

    #[tokio::test]
    async fn test_critical_failure_stops_later_phases() {
        let log: Log = Arc::default();
        let pipeline = plan(vec![
            (Phase(10), Recorder::ok("a")),
            (Phase(20), Recorder::failing("b", Criticality::Critical)),
            (Phase(20), Recorder::ok("b2")),
            (Phase(30), Recorder::ok("c")),
        ]);

        let report = PipelineExecutor::execute(pipeline, log.clone(), &NoopObserver).await;

        assert_eq!(*log.lock(), vec!["a", "b"]);
        match report.critical_failure {
            Some(PodbootError::CriticalInitFailure { step, phase, .. }) => {
                assert_eq!(step, "b");
                assert_eq!(phase, 20);
            }
            other => panic!("expected critical failure, got {:?}", other),
        }
        assert!(report.metrics.task("c").is_none());
    }

    #[tokio::test]
    async fn test_best_effort_failures_never_block() {
        let log: Log = Arc::default();
        let pipeline = plan(vec![
            (Phase(10), Recorder::failing("a", Criticality::BestEffort)),
            (Phase(20), Recorder::failing("b", Criticality::BestEffort)),
            (Phase(30), Recorder::ok("c")),
        ]);

        let report = PipelineExecutor::execute(pipeline, log.clone(), &NoopObserver).await;

        assert!(!report.is_aborted());
        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert_eq!(report.best_effort_failures(), vec!["a", "b"]);
    }

    struct SkipAll;

    impl PipelineObserver for SkipAll {
        fn should_skip(&self, _task: &str) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_observer_skip_bypasses_action() {
        let log: Log = Arc::default();
        let pipeline = plan(vec![(Phase(10), Recorder::ok("a"))]);

        let report = PipelineExecutor::execute(pipeline, log.clone(), &SkipAll).await;

        assert!(log.lock().is_empty());
        assert_eq!(report.metrics.task("a").unwrap().status, TaskStatus::Skipped);
    }
}
