//! Task: Directories.
//!
//! Ensures directories exist with the configured mode and owner, and adds
//! the ones marked `on_path` to the snapshot PATH.

use super::{InitCtx, log_task_error};
use crate::config::DirectorySpec;
use crate::pipeline::{Criticality, PipelineTask, TaskOutput};
use crate::util::{Ownership, chown_path};
use async_trait::async_trait;
use podboot_shared::errors::PodbootResult;
use std::os::unix::fs::PermissionsExt;

pub struct DirectoriesTask {
    pub name: String,
    pub criticality: Criticality,
    pub paths: Vec<DirectorySpec>,
}

impl DirectoriesTask {
    async fn add_path_fragments(&self, ctx: &InitCtx) -> PodbootResult<()> {
        let mut ctx = ctx.lock().await;
        for entry in self.paths.iter().filter(|s| s.on_path) {
            ctx.snapshot
                .prepend_path(entry.path.to_string_lossy().into_owned())?;
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineTask<InitCtx> for DirectoriesTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn criticality(&self) -> Criticality {
        self.criticality
    }

    async fn is_satisfied(&self, _ctx: InitCtx) -> PodbootResult<bool> {
        Ok(self.paths.iter().all(directory_matches))
    }

    async fn on_satisfied(&self, ctx: InitCtx) -> PodbootResult<()> {
        self.add_path_fragments(&ctx).await
    }

    async fn run(&self, ctx: InitCtx) -> PodbootResult<TaskOutput> {
        let owner = ctx.lock().await.config.owner;

        for entry in &self.paths {
            ensure_directory(entry, owner).inspect_err(|e| log_task_error(&self.name, e))?;
        }

        self.add_path_fragments(&ctx).await?;
        Ok(TaskOutput::done())
    }
}

fn directory_matches(entry: &DirectorySpec) -> bool {
    std::fs::metadata(&entry.path)
        .map(|m| m.is_dir() && m.permissions().mode() & 0o7777 == entry.mode)
        .unwrap_or(false)
}

fn ensure_directory(entry: &DirectorySpec, owner: Option<Ownership>) -> PodbootResult<()> {
    std::fs::create_dir_all(&entry.path)?;
    std::fs::set_permissions(&entry.path, std::fs::Permissions::from_mode(entry.mode))?;
    chown_path(&entry.path, owner)?;
    tracing::debug!(path = %entry.path.display(), mode = %format!("{:o}", entry.mode), "Directory ensured");
    Ok(())
}
