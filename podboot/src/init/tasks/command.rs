//! Task: External command with fallback alternatives.
//!
//! Package installs and similar work are delegated to external tools. The
//! step is satisfied when every configured predicate holds:
//!
//! - `creates`: the path exists
//! - `binary`: the name resolves on the snapshot PATH
//! - `check`: the command exits 0
//!
//! Otherwise the alternatives are tried in order until one succeeds. On
//! success (or when already satisfied) the step's PATH fragments and
//! variables are added to the snapshot.

use super::{InitCtx, log_task_error};
use crate::env::merge_path;
use crate::pipeline::{Criticality, PipelineTask, TaskOutput};
use crate::util::{Ownership, find_on_path, run_command};
use async_trait::async_trait;
use podboot_shared::errors::{PodbootError, PodbootResult};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub struct CommandTask {
    pub name: String,
    pub criticality: Criticality,
    pub creates: Option<PathBuf>,
    pub binary: Option<String>,
    pub check: Option<Vec<String>>,
    pub alternatives: Vec<Vec<String>>,
    pub path: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub run_as_owner: bool,
}

impl CommandTask {
    /// Environment for this step's commands: HOME of the execution account,
    /// snapshot, step variables, and a PATH with the step's own fragments in front.
    async fn command_env(&self, ctx: &InitCtx) -> Vec<(String, String)> {
        let ctx = ctx.lock().await;
        let search_path = merge_path(&self.path, &ctx.snapshot.search_path(&ctx.config.base_path));

        let mut env = BTreeMap::from([(
            "HOME".to_string(),
            ctx.config.home_dir.to_string_lossy().into_owned(),
        )]);
        env.extend(ctx.snapshot.vars().clone());
        env.extend(self.env.clone());
        env.insert("PATH".to_string(), search_path);
        env.into_iter().collect()
    }

    async fn command_owner(&self, ctx: &InitCtx) -> Option<Ownership> {
        if !self.run_as_owner {
            return None;
        }
        ctx.lock().await.config.owner
    }

    async fn contribute(&self, ctx: &InitCtx) -> PodbootResult<()> {
        let mut ctx = ctx.lock().await;
        for fragment in &self.path {
            ctx.snapshot.prepend_path(fragment.as_str())?;
        }
        for (key, value) in &self.env {
            ctx.snapshot.set(key.as_str(), value.as_str())?;
        }
        Ok(())
    }

    /// Predicates that can be evaluated without running anything.
    fn artifacts_present(&self, env: &[(String, String)]) -> bool {
        if let Some(creates) = &self.creates
            && !creates.exists()
        {
            return false;
        }
        if let Some(binary) = &self.binary {
            let search_path = env
                .iter()
                .find(|(k, _)| k == "PATH")
                .map(|(_, v)| v.as_str())
                .unwrap_or_default();
            if find_on_path(binary, search_path).is_none() {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl PipelineTask<InitCtx> for CommandTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn criticality(&self) -> Criticality {
        self.criticality
    }

    async fn is_satisfied(&self, ctx: InitCtx) -> PodbootResult<bool> {
        if self.creates.is_none() && self.binary.is_none() && self.check.is_none() {
            return Ok(false);
        }

        let env = self.command_env(&ctx).await;
        if !self.artifacts_present(&env) {
            return Ok(false);
        }
        if let Some(check) = &self.check {
            let owner = self.command_owner(&ctx).await;
            return Ok(run_command(check, &env, owner).await.is_ok());
        }
        Ok(true)
    }

    async fn on_satisfied(&self, ctx: InitCtx) -> PodbootResult<()> {
        self.contribute(&ctx).await
    }

    async fn run(&self, ctx: InitCtx) -> PodbootResult<TaskOutput> {
        let env = self.command_env(&ctx).await;
        let owner = self.command_owner(&ctx).await;
        let mut attempts = Vec::new();

        for (index, argv) in self.alternatives.iter().enumerate() {
            let program = argv.first().map(String::as_str).unwrap_or_default();
            tracing::debug!(step = %self.name, alternative = index, program, "Trying alternative");

            match run_command(argv, &env, owner).await {
                Ok(()) => {
                    if !self.artifacts_present(&env) {
                        tracing::warn!(
                            step = %self.name,
                            alternative = index,
                            "Alternative exited 0 but the expected result is missing"
                        );
                        attempts.push(format!("{}: exited 0, expected result missing", program));
                        continue;
                    }
                    self.contribute(&ctx).await?;
                    return Ok(TaskOutput::via(index));
                }
                Err(e) => {
                    log_task_error(&self.name, &e);
                    tracing::warn!(
                        step = %self.name,
                        alternative = index,
                        "Alternative failed, trying next: {}",
                        e
                    );
                    attempts.push(format!("{}: {}", program, e));
                }
            }
        }

        Err(PodbootError::AlternativesExhausted {
            step: self.name.clone(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootConfig;
    use crate::init::types::InitContext;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    fn ctx() -> InitCtx {
        Arc::new(Mutex::new(InitContext::new(
            Arc::new(BootConfig::default()),
            BTreeMap::new(),
        )))
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into()]
    }

    fn task(creates: PathBuf, alternatives: Vec<Vec<String>>) -> CommandTask {
        CommandTask {
            name: "install".into(),
            criticality: Criticality::BestEffort,
            creates: Some(creates),
            binary: None,
            check: None,
            alternatives,
            path: vec![],
            env: BTreeMap::new(),
            run_as_owner: false,
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_second_alternative() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("installed");
        let task = task(
            marker.clone(),
            vec![
                sh("echo 'externally-managed-environment' >&2; exit 1"),
                sh(&format!("touch {}", marker.display())),
            ],
        );

        let output = task.run(ctx()).await.unwrap();

        assert_eq!(output.alternative, Some(1));
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn test_all_alternatives_fail() {
        let dir = TempDir::new().unwrap();
        let task = task(dir.path().join("never"), vec![sh("exit 1"), sh("exit 2")]);

        let err = task.run(ctx()).await.unwrap_err();

        match err {
            PodbootError::AlternativesExhausted { step, attempts } => {
                assert_eq!(step, "install");
                assert_eq!(attempts.len(), 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_success_without_result_is_not_accepted() {
        let dir = TempDir::new().unwrap();
        let task = task(dir.path().join("never"), vec![sh("true")]);
        assert!(task.run(ctx()).await.is_err());
    }

    #[tokio::test]
    async fn test_satisfied_step_still_contributes_path() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("present");
        std::fs::write(&marker, "").unwrap();
        let mut task = task(marker, vec![sh("exit 1")]);
        task.path = vec!["/opt/tool/bin".into()];
        task.env = BTreeMap::from([("TOOL_HOME".to_string(), "/opt/tool".to_string())]);
        let ctx = ctx();

        assert!(task.is_satisfied(ctx.clone()).await.unwrap());
        task.on_satisfied(ctx.clone()).await.unwrap();

        let ctx = ctx.lock().await;
        assert_eq!(ctx.snapshot.path_fragments(), ["/opt/tool/bin".to_string()]);
        assert_eq!(ctx.snapshot.get("TOOL_HOME"), Some("/opt/tool"));
    }

    #[tokio::test]
    async fn test_check_predicate_sees_step_env() {
        let task = CommandTask {
            name: "check".into(),
            criticality: Criticality::Critical,
            creates: None,
            binary: None,
            check: Some(sh("test \"$MARKER\" = yes")),
            alternatives: vec![sh("exit 1")],
            path: vec![],
            env: BTreeMap::from([("MARKER".to_string(), "yes".to_string())]),
            run_as_owner: false,
        };
        assert!(task.is_satisfied(ctx()).await.unwrap());
    }

    #[tokio::test]
    async fn test_commands_get_execution_home() {
        let dir = TempDir::new().unwrap();
        let config = BootConfig {
            home_dir: dir.path().join("home/dev"),
            ..BootConfig::default()
        };
        let ctx: InitCtx = Arc::new(Mutex::new(InitContext::new(
            Arc::new(config),
            BTreeMap::new(),
        )));
        let installed = dir.path().join("home/dev/.local/bin/tool");
        let task = task(
            installed.clone(),
            vec![sh("mkdir -p \"$HOME/.local/bin\" && touch \"$HOME/.local/bin/tool\"")],
        );

        task.run(ctx).await.unwrap();
        assert!(installed.exists());
    }

    #[tokio::test]
    async fn test_run_as_owner_uses_configured_ids() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("ids");
        let owner = Ownership {
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        };
        let config = BootConfig {
            owner: Some(owner),
            ..BootConfig::default()
        };
        let ctx: InitCtx = Arc::new(Mutex::new(InitContext::new(
            Arc::new(config),
            BTreeMap::new(),
        )));
        let mut task = task(
            out.clone(),
            vec![sh(&format!("echo \"$(id -u):$(id -g)\" > {}", out.display()))],
        );
        task.run_as_owner = true;

        task.run(ctx).await.unwrap();
        assert_eq!(
            std::fs::read_to_string(&out).unwrap().trim(),
            format!("{}:{}", owner.uid, owner.gid)
        );
    }

    #[tokio::test]
    async fn test_step_without_predicates_always_runs() {
        let task = CommandTask {
            name: "always".into(),
            criticality: Criticality::Critical,
            creates: None,
            binary: None,
            check: None,
            alternatives: vec![sh("true")],
            path: vec![],
            env: BTreeMap::new(),
            run_as_owner: false,
        };
        assert!(!task.is_satisfied(ctx()).await.unwrap());
        assert_eq!(task.run(ctx()).await.unwrap().alternative, Some(0));
    }
}
