use crate::pipeline::{Criticality, Phase};
use podboot_shared::errors::PodbootError;

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    /// Predicate held; action not run.
    Satisfied,
    /// Skipped because the journal already records it as completed.
    Skipped,
    /// Action ran and succeeded.
    Completed { alternative: Option<usize> },
    /// Predicate or action failed.
    Failed {
        criticality: Criticality,
        error: String,
    },
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Satisfied => "satisfied",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Completed { .. } => "completed",
            TaskStatus::Failed {
                criticality: Criticality::Critical,
                ..
            } => "critical_failure",
            TaskStatus::Failed {
                criticality: Criticality::BestEffort,
                ..
            } => "best_effort_failure",
        }
    }

    /// True when the task's end state is reached.
    pub fn is_success(&self) -> bool {
        !matches!(self, TaskStatus::Failed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct TaskMetrics {
    pub name: String,
    pub phase: Phase,
    pub status: TaskStatus,
    pub duration_ms: u128,
}

#[derive(Debug, Clone)]
pub struct StageMetrics {
    pub phase: Phase,
    pub duration_ms: u128,
    pub tasks: Vec<TaskMetrics>,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    pub stages: Vec<StageMetrics>,
}

impl PipelineMetrics {
    pub fn tasks(&self) -> impl Iterator<Item = &TaskMetrics> {
        self.stages.iter().flat_map(|stage| stage.tasks.iter())
    }

    pub fn task(&self, name: &str) -> Option<&TaskMetrics> {
        self.tasks().find(|task| task.name == name)
    }

    /// Log a one-line summary per stage.
    pub fn log_stages(&self) {
        for stage in &self.stages {
            let names: Vec<String> = stage
                .tasks
                .iter()
                .map(|t| format!("{}={}", t.name, t.status.as_str()))
                .collect();
            tracing::info!(
                phase = %stage.phase,
                duration_ms = stage.duration_ms as u64,
                "Phase finished: {}",
                names.join(", ")
            );
        }
        tracing::info!(
            total_duration_ms = self.total_duration_ms as u64,
            "Init pipeline finished"
        );
    }
}

/// Everything the executor learned from one pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    pub metrics: PipelineMetrics,
    /// Set when a critical task failed and the pipeline aborted.
    pub critical_failure: Option<PodbootError>,
}

impl PipelineReport {
    pub fn is_aborted(&self) -> bool {
        self.critical_failure.is_some()
    }

    /// Names of best-effort tasks that failed.
    pub fn best_effort_failures(&self) -> Vec<&str> {
        self.metrics
            .tasks()
            .filter(|t| {
                matches!(
                    t.status,
                    TaskStatus::Failed {
                        criticality: Criticality::BestEffort,
                        ..
                    }
                )
            })
            .map(|t| t.name.as_str())
            .collect()
    }
}
