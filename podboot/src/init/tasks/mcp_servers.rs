//! Task: MCP server verification.
//!
//! Checks that every declared MCP server command resolves on the snapshot
//! PATH and that its variables are present, then writes the launcher
//! configuration. Problems are reported as a step failure so the step's
//! classification decides whether they matter.

use super::{InitCtx, log_task_error};
use crate::mcp::{launcher_config, verify_servers};
use crate::pipeline::{Criticality, PipelineTask, TaskOutput};
use crate::util::{chown_path, write_atomic};
use async_trait::async_trait;
use podboot_shared::errors::{PodbootError, PodbootResult};
use std::path::PathBuf;

pub struct McpServersTask {
    pub name: String,
    pub criticality: Criticality,
    pub config_path: Option<PathBuf>,
}

#[async_trait]
impl PipelineTask<InitCtx> for McpServersTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn criticality(&self) -> Criticality {
        self.criticality
    }

    async fn is_satisfied(&self, _ctx: InitCtx) -> PodbootResult<bool> {
        Ok(false)
    }

    async fn on_satisfied(&self, _ctx: InitCtx) -> PodbootResult<()> {
        Ok(())
    }

    async fn run(&self, ctx: InitCtx) -> PodbootResult<TaskOutput> {
        let ctx = ctx.lock().await;
        let servers = &ctx.config.mcp_servers;
        if servers.is_empty() {
            tracing::debug!(step = %self.name, "No MCP servers declared");
            return Ok(TaskOutput::done());
        }

        let problems = verify_servers(servers, &ctx.snapshot, &ctx.config.base_path);
        for problem in &problems {
            tracing::warn!(step = %self.name, "{}", problem);
        }

        if let Some(path) = &self.config_path {
            let config = launcher_config(servers, &ctx.snapshot);
            write_atomic(path, &serde_json::to_vec_pretty(&config)?, 0o600)
                .and_then(|_| chown_path(path, ctx.config.owner))
                .inspect_err(|e| log_task_error(&self.name, e))?;
            tracing::info!(path = %path.display(), "Wrote MCP launcher configuration");
        }

        if !problems.is_empty() {
            return Err(PodbootError::step(
                &self.name,
                format!(
                    "{} of {} servers unusable: {}",
                    problems.len(),
                    servers.len(),
                    problems
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
            ));
        }

        tracing::info!(servers = servers.len(), "All MCP servers verified");
        Ok(TaskOutput::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootConfig;
    use crate::init::types::InitContext;
    use crate::mcp::McpServerDescriptor;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    fn ctx_with_servers() -> InitCtx {
        let mut config = BootConfig::default();
        config.base_path = "/usr/bin:/bin".into();
        config.mcp_servers = BTreeMap::from([
            (
                "shell".to_string(),
                McpServerDescriptor {
                    command: "sh".into(),
                    args: vec![],
                    env: vec!["GITHUB_TOKEN".into()],
                },
            ),
            (
                "missing".to_string(),
                McpServerDescriptor {
                    command: "definitely-not-installed-mcp".into(),
                    args: vec![],
                    env: vec![],
                },
            ),
        ]);
        let mut ctx = InitContext::new(Arc::new(config), BTreeMap::new());
        ctx.snapshot.set("GITHUB_TOKEN", "ghp_x").unwrap();
        Arc::new(Mutex::new(ctx))
    }

    #[tokio::test]
    async fn test_reports_unresolvable_command_and_writes_config() {
        let dir = TempDir::new().unwrap();
        let task = McpServersTask {
            name: "mcp_servers".into(),
            criticality: Criticality::BestEffort,
            config_path: Some(dir.path().join("mcp/servers.json")),
        };

        let err = task.run(ctx_with_servers()).await.unwrap_err();
        assert!(err.to_string().contains("definitely-not-installed-mcp"));

        let written: serde_json::Value = serde_json::from_slice(
            &std::fs::read(dir.path().join("mcp/servers.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(
            written["mcpServers"]["shell"]["env"]["GITHUB_TOKEN"],
            "ghp_x"
        );
    }

    #[tokio::test]
    async fn test_no_servers_is_success() {
        let ctx: InitCtx = Arc::new(Mutex::new(InitContext::new(
            Arc::new(BootConfig::default()),
            BTreeMap::new(),
        )));
        let task = McpServersTask {
            name: "mcp_servers".into(),
            criticality: Criticality::BestEffort,
            config_path: None,
        };
        task.run(ctx).await.unwrap();
    }
}
