//! Container initialization.
//!
//! ## Architecture
//!
//! The execution plan is built from the configured steps, grouped by phase:
//!
//! ```text
//! environment(10)   credentials, directories
//! packages(20)      command steps with fallback alternatives
//! system(30)        authorized keys, host keys, sshd config
//! finalize(90)      MCP verification, then publish_environment (always last)
//! ```
//!
//! Steps share an [`InitContext`] holding the environment snapshot. Once
//! `publish_environment` has run the snapshot is sealed and the published
//! copy is what services see.

mod tasks;
mod types;

pub use types::{InitContext, InitCtx, JournalObserver};

use crate::config::BootConfig;
use crate::env::PublishedEnvironment;
use crate::pipeline::{
    BoxedTask, ExecutionPlan, PipelineBuilder, PipelineExecutor, PipelineObserver, PipelineReport,
    Phase,
};
use podboot_shared::errors::{PodbootError, PodbootResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use tasks::{PublishEnvironmentTask, task_for_step};

// ============================================================================
// EXECUTION PLAN
// ============================================================================

/// Build the execution plan for `config`.
///
/// Steps keep their declaration order within a phase. The publish step is
/// appended to the finalize phase so it always runs last.
pub fn get_execution_plan(config: &BootConfig) -> ExecutionPlan<InitCtx> {
    let mut tasks: Vec<(Phase, BoxedTask<InitCtx>)> = config
        .steps
        .iter()
        .map(|step| (step.phase, task_for_step(step)))
        .collect();
    tasks.push((Phase::FINALIZE, Box::new(PublishEnvironmentTask)));

    ExecutionPlan::from_tasks(tasks)
}

/// Outcome of the init phase.
pub struct InitOutcome {
    pub report: PipelineReport,
    /// `None` when init aborted before publishing.
    pub published: Option<PublishedEnvironment>,
}

/// Runs the init pipeline once.
///
/// # Example
///
/// ```ignore
/// let outcome = InitRunner::new(config, std::env::vars().collect())
///     .run(&observer)
///     .await?;
/// ```
pub struct InitRunner {
    config: Arc<BootConfig>,
    process_env: BTreeMap<String, String>,
}

impl InitRunner {
    /// `process_env` is the container environment credentials are read from.
    pub fn new(config: Arc<BootConfig>, process_env: BTreeMap<String, String>) -> Self {
        Self {
            config,
            process_env,
        }
    }

    pub async fn run(self, observer: &dyn PipelineObserver) -> PodbootResult<InitOutcome> {
        let InitRunner {
            config,
            process_env,
        } = self;

        std::fs::create_dir_all(&config.state_dir)?;

        let plan = get_execution_plan(&config);
        tracing::info!(
            steps = plan.task_names().len(),
            rerun_policy = ?config.rerun_policy,
            "Starting container init"
        );

        let ctx: InitCtx = Arc::new(Mutex::new(InitContext::new(config, process_env)));
        let pipeline = PipelineBuilder::from_plan(plan);
        let report = PipelineExecutor::execute(pipeline, Arc::clone(&ctx), observer).await;

        report.metrics.log_stages();

        let published = ctx.lock().await.published.take();
        if !report.is_aborted() && published.is_none() {
            return Err(PodbootError::Internal(
                "init finished without publishing the environment".into(),
            ));
        }

        let failures = report.best_effort_failures();
        if failures.is_empty() {
            tracing::info!("Container init complete");
        } else {
            tracing::warn!(
                failed = %failures.join(", "),
                "Container init complete with best-effort failures"
            );
        }

        Ok(InitOutcome { report, published })
    }
}
