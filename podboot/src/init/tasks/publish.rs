//! Task: Publish the environment snapshot.
//!
//! Always the last step of the finalize phase. After it runs the snapshot
//! is sealed and services, SSH logins and `podboot exec` all read the same
//! published files.

use super::{InitCtx, log_task_error};
use crate::config::PUBLISH_STEP;
use crate::env::PublishedEnvironment;
use crate::pipeline::{Criticality, PipelineTask, TaskOutput};
use async_trait::async_trait;
use podboot_shared::errors::PodbootResult;

pub struct PublishEnvironmentTask;

#[async_trait]
impl PipelineTask<InitCtx> for PublishEnvironmentTask {
    fn name(&self) -> &str {
        PUBLISH_STEP
    }

    fn criticality(&self) -> Criticality {
        Criticality::Critical
    }

    /// Satisfied when identical content is already published with the
    /// configured mode and owner.
    async fn is_satisfied(&self, ctx: InitCtx) -> PodbootResult<bool> {
        let ctx = ctx.lock().await;
        let config = &ctx.config;
        Ok(ctx
            .snapshot
            .is_published_in(&config.state_dir, config.world_readable_env, config.owner))
    }

    async fn on_satisfied(&self, ctx: InitCtx) -> PodbootResult<()> {
        let mut ctx = ctx.lock().await;
        let published = PublishedEnvironment::load_from_dir(&ctx.config.state_dir)?;
        ctx.snapshot.seal();
        ctx.published = Some(published);
        Ok(())
    }

    async fn run(&self, ctx: InitCtx) -> PodbootResult<TaskOutput> {
        let mut ctx = ctx.lock().await;
        let config = ctx.config.clone();
        let published = ctx
            .snapshot
            .publish(&config.state_dir, config.world_readable_env, config.owner)
            .inspect_err(|e| log_task_error(PUBLISH_STEP, e))?;
        ctx.published = Some(published);
        Ok(TaskOutput::done())
    }
}
