//! Task: sshd drop-in configuration.

use super::{InitCtx, log_task_error};
use crate::pipeline::{Criticality, PipelineTask, TaskOutput};
use crate::util::write_atomic;
use async_trait::async_trait;
use podboot_shared::errors::PodbootResult;
use std::path::PathBuf;

pub struct SshdConfigTask {
    pub name: String,
    pub criticality: Criticality,
    pub path: PathBuf,
    pub port: u16,
}

impl SshdConfigTask {
    fn render(&self) -> String {
        format!(
            "# Managed by podboot. Local changes are overwritten at boot.\n\
             Port {}\n\
             PasswordAuthentication no\n\
             KbdInteractiveAuthentication no\n\
             PubkeyAuthentication yes\n\
             PermitRootLogin prohibit-password\n",
            self.port
        )
    }
}

#[async_trait]
impl PipelineTask<InitCtx> for SshdConfigTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn criticality(&self) -> Criticality {
        self.criticality
    }

    async fn is_satisfied(&self, _ctx: InitCtx) -> PodbootResult<bool> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(existing) => Ok(existing == self.render()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn on_satisfied(&self, _ctx: InitCtx) -> PodbootResult<()> {
        Ok(())
    }

    async fn run(&self, _ctx: InitCtx) -> PodbootResult<TaskOutput> {
        write_atomic(&self.path, self.render().as_bytes(), 0o644)
            .inspect_err(|e| log_task_error(&self.name, e))?;
        tracing::info!(path = %self.path.display(), port = self.port, "Wrote sshd configuration");
        Ok(TaskOutput::done())
    }
}
