//! Task: login-shell hook.
//!
//! sshd starts sessions with a clean environment, so interactive logins only
//! see the snapshot through `/etc/profile.d`.

use super::{InitCtx, log_task_error};
use crate::env::{ENVIRONMENT_PROFILE, render_profile_hook};
use crate::pipeline::{Criticality, PipelineTask, TaskOutput};
use crate::util::write_atomic;
use async_trait::async_trait;
use podboot_shared::errors::PodbootResult;
use std::path::PathBuf;

pub struct ProfileHookTask {
    pub name: String,
    pub criticality: Criticality,
    pub path: PathBuf,
}

#[async_trait]
impl PipelineTask<InitCtx> for ProfileHookTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn criticality(&self) -> Criticality {
        self.criticality
    }

    async fn is_satisfied(&self, ctx: InitCtx) -> PodbootResult<bool> {
        let expected = {
            let ctx = ctx.lock().await;
            render_profile_hook(&ctx.config.state_dir.join(ENVIRONMENT_PROFILE))
        };
        match tokio::fs::read_to_string(&self.path).await {
            Ok(existing) => Ok(existing == expected),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn on_satisfied(&self, _ctx: InitCtx) -> PodbootResult<()> {
        Ok(())
    }

    async fn run(&self, ctx: InitCtx) -> PodbootResult<TaskOutput> {
        let profile = ctx.lock().await.config.state_dir.join(ENVIRONMENT_PROFILE);
        write_atomic(&self.path, render_profile_hook(&profile).as_bytes(), 0o644)
            .inspect_err(|e| log_task_error(&self.name, e))?;
        tracing::info!(hook = %self.path.display(), profile = %profile.display(), "Installed login profile hook");
        Ok(TaskOutput::done())
    }
}
