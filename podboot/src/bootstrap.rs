//! Container bootstrap: init, then supervise.
//!
//! ```text
//! begin boot ─▶ init pipeline ─┬─ critical failure ─▶ Failed (exit 2)
//!                              └─ published ─▶ StartingServices
//!                                   ─▶ supervisor + readiness ─┬─ Ready
//!                                                              └─ unhealthy (exit 3 at shutdown)
//! ```
//!
//! A termination signal during init drops the in-flight step, which kills
//! its child process.
//!
//! Orphaned grandchildren are not reaped. A `waitpid(-1)` loop would also
//! collect the supervised children whose exit status the restart loop reads,
//! so podboot expects an init shim in front of it (`tini`,
//! `docker run --init`, or a shared process namespace).

use crate::config::{BootConfig, PUBLISH_STEP};
use crate::db::JournalStore;
use crate::init::{InitOutcome, InitRunner, JournalObserver};
use crate::pipeline::{Criticality, PipelineMetrics, TaskStatus};
use crate::state::{BootState, BootStatus};
use crate::supervisor::{ServiceDescriptor, Supervisor};
use podboot_shared::errors::{PodbootError, PodbootResult};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Pid the kernel hands orphaned processes to.
const INIT_PID: u32 = 1;

/// How often service state is written to the status file.
const STATUS_INTERVAL: Duration = Duration::from_secs(2);

/// How a bootstrap run ended.
#[derive(Debug)]
pub enum BootOutcome {
    /// Init finished (`podboot init`).
    Initialized,
    /// Reached `Ready`, then shut down on request.
    Ready,
    /// Services never passed readiness before shutdown.
    NotReady(PodbootError),
    /// A critical init step failed; no service was started.
    Failed(PodbootError),
    /// Stopped by a signal before anything went wrong.
    Interrupted,
}

impl BootOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            BootOutcome::Initialized | BootOutcome::Ready | BootOutcome::Interrupted => 0,
            BootOutcome::Failed(_) => 2,
            BootOutcome::NotReady(_) => 3,
        }
    }
}

/// Exit code for an error that escaped the bootstrap.
pub fn exit_code_for_error(error: &PodbootError) -> i32 {
    match error {
        PodbootError::CriticalInitFailure { .. } => 2,
        PodbootError::ReadinessTimeout { .. } => 3,
        _ => 1,
    }
}

/// True when `pid` is the container's init process.
pub fn is_container_init(pid: u32) -> bool {
    pid == INIT_PID
}

pub struct Bootstrap {
    config: Arc<BootConfig>,
    process_env: BTreeMap<String, String>,
}

impl Bootstrap {
    pub fn new(config: BootConfig, process_env: BTreeMap<String, String>) -> Self {
        Self {
            config: Arc::new(config),
            process_env,
        }
    }

    /// Run init only. Services are not started and the status file is left alone.
    pub async fn init_only<S>(self, shutdown: S) -> PodbootResult<BootOutcome>
    where
        S: Future<Output = ()>,
    {
        let (journal, boot_id) = self.begin_journal()?;
        let outcome = match self.run_init(&journal, &boot_id, shutdown).await? {
            Some(outcome) => outcome,
            None => return Ok(BootOutcome::Interrupted),
        };

        if let Some(err) = outcome.report.critical_failure {
            journal.set_boot_status(&boot_id, BootStatus::Failed.as_str())?;
            return Ok(BootOutcome::Failed(err));
        }
        journal.set_boot_status(&boot_id, "initialized")?;
        Ok(BootOutcome::Initialized)
    }

    /// Run init, start services, and supervise until `shutdown` resolves.
    pub async fn run<S>(self, shutdown: S) -> PodbootResult<BootOutcome>
    where
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let config = Arc::clone(&self.config);
        if is_container_init(std::process::id()) {
            tracing::warn!(
                "Running as PID 1 without an init shim; orphaned processes will not be reaped (use tini or `docker run --init`)"
            );
        }

        let (journal, boot_id) = self.begin_journal()?;
        let mut state = BootState::begin(&config.state_dir, &boot_id)?;

        let outcome = match self.run_init(&journal, &boot_id, &mut shutdown).await? {
            Some(outcome) => outcome,
            None => return Ok(BootOutcome::Interrupted),
        };

        if let Some(err) = outcome.report.critical_failure {
            state.fail(&err)?;
            journal.set_boot_status(&boot_id, BootStatus::Failed.as_str())?;
            tracing::error!("No services started: {}", err);
            return Ok(BootOutcome::Failed(err));
        }

        let published = outcome
            .published
            .ok_or_else(|| PodbootError::Internal("environment was not published".into()))?;
        check_dependencies(&config.services, &outcome.report.metrics)?;

        state.transition(BootStatus::StartingServices)?;
        journal.set_boot_status(&boot_id, BootStatus::StartingServices.as_str())?;

        let handle = Supervisor::new(
            config.services.clone(),
            published.to_env(&config.base_path),
            config.owner,
            config.stop_timeout(),
        )
        .start();

        let mut not_ready = None;
        {
            let readiness = handle.wait_ready(config.readiness_timeout());
            tokio::pin!(readiness);
            let mut readiness_done = false;
            let mut ticker = tokio::time::interval(STATUS_INTERVAL);

            loop {
                tokio::select! {
                    result = &mut readiness, if !readiness_done => {
                        readiness_done = true;
                        match result {
                            Ok(()) => {
                                state.update_services(handle.states())?;
                                state.transition(BootStatus::Ready)?;
                                journal.set_boot_status(&boot_id, BootStatus::Ready.as_str())?;
                                tracing::info!(boot_id = %boot_id, "Container ready");
                            }
                            Err(e) => {
                                tracing::error!("Container unhealthy, services keep running: {}", e);
                                state.mark_unhealthy(&e)?;
                                not_ready = Some(e);
                            }
                        }
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = state.update_services(handle.states()) {
                            tracing::warn!("Failed to write status file: {}", e);
                        }
                    }
                    _ = &mut shutdown => {
                        tracing::info!("Termination requested");
                        break;
                    }
                }
            }
        }

        handle.shutdown().await;

        Ok(match not_ready {
            Some(e) => BootOutcome::NotReady(e),
            None if state.status() == BootStatus::Ready => BootOutcome::Ready,
            None => BootOutcome::Interrupted,
        })
    }

    fn begin_journal(&self) -> PodbootResult<(JournalStore, String)> {
        std::fs::create_dir_all(&self.config.state_dir)?;
        let journal = JournalStore::open(&self.config.journal_path())?;
        let boot_id = uuid::Uuid::new_v4().to_string();
        journal.begin_boot(&boot_id, BootStatus::Init.as_str())?;
        tracing::info!(boot_id = %boot_id, state_dir = %self.config.state_dir.display(), "Boot started");
        Ok((journal, boot_id))
    }

    /// `None` when `shutdown` fired first.
    async fn run_init<S>(
        &self,
        journal: &JournalStore,
        boot_id: &str,
        shutdown: S,
    ) -> PodbootResult<Option<InitOutcome>>
    where
        S: Future<Output = ()>,
    {
        let observer = JournalObserver::new(
            journal.clone(),
            boot_id.to_string(),
            self.config.rerun_policy,
        );
        let runner = InitRunner::new(Arc::clone(&self.config), self.process_env.clone());

        tokio::select! {
            outcome = runner.run(&observer) => outcome.map(Some),
            _ = shutdown => {
                tracing::warn!("Termination requested during init, abandoning in-flight step");
                journal.set_boot_status(boot_id, "interrupted")?;
                Ok(None)
            }
        }
    }
}

/// Confirm every service dependency completed, was satisfied, or is best-effort.
fn check_dependencies(
    services: &[ServiceDescriptor],
    metrics: &PipelineMetrics,
) -> PodbootResult<()> {
    for service in services {
        for dep in &service.depends_on {
            if dep == PUBLISH_STEP {
                continue;
            }
            match metrics.task(dep).map(|t| &t.status) {
                Some(TaskStatus::Failed {
                    criticality: Criticality::BestEffort,
                    error,
                }) => {
                    tracing::warn!(
                        service = %service.name,
                        step = %dep,
                        "Dependency failed (best effort), starting anyway: {}",
                        error
                    );
                }
                Some(status) if status.is_success() => {}
                _ => {
                    return Err(PodbootError::Internal(format!(
                        "service '{}' depends on step '{}' which did not complete",
                        service.name, dep
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Resolves on SIGTERM or SIGINT.
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = term.recv() => tracing::info!("Received SIGTERM"),
                _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT"),
            }
        }
        Err(e) => {
            tracing::warn!("Cannot install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Phase, TaskMetrics};

    fn metrics(status: TaskStatus) -> PipelineMetrics {
        let mut metrics = PipelineMetrics::default();
        metrics.stages.push(crate::pipeline::StageMetrics {
            phase: Phase::SYSTEM,
            duration_ms: 0,
            tasks: vec![TaskMetrics {
                name: "host_keys".into(),
                phase: Phase::SYSTEM,
                status,
                duration_ms: 0,
            }],
        });
        metrics
    }

    fn service() -> ServiceDescriptor {
        let mut service = ServiceDescriptor::new("sshd", vec!["sshd".into()]);
        service.depends_on = vec!["host_keys".into(), PUBLISH_STEP.into()];
        service
    }

    #[test]
    fn test_only_pid_one_is_container_init() {
        assert!(is_container_init(1));
        assert!(!is_container_init(std::process::id()));
    }

    #[test]
    fn test_best_effort_failure_does_not_block_service() {
        let m = metrics(TaskStatus::Failed {
            criticality: Criticality::BestEffort,
            error: "boom".into(),
        });
        check_dependencies(&[service()], &m).unwrap();
    }

    #[test]
    fn test_satisfied_and_completed_dependencies_pass() {
        check_dependencies(&[service()], &metrics(TaskStatus::Satisfied)).unwrap();
        check_dependencies(
            &[service()],
            &metrics(TaskStatus::Completed { alternative: None }),
        )
        .unwrap();
    }

    #[test]
    fn test_missing_dependency_is_error() {
        let err = check_dependencies(&[service()], &PipelineMetrics::default()).unwrap_err();
        assert!(err.to_string().contains("host_keys"));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(BootOutcome::Ready.exit_code(), 0);
        assert_eq!(
            BootOutcome::Failed(PodbootError::Internal("x".into())).exit_code(),
            2
        );
        assert_eq!(
            BootOutcome::NotReady(PodbootError::ReadinessTimeout {
                service: "sshd".into(),
                timeout_ms: 10
            })
            .exit_code(),
            3
        );
        assert_eq!(exit_code_for_error(&PodbootError::Config("bad".into())), 1);
    }
}
