//! Task: Credentials.
//!
//! Copies API keys and tokens from the container environment into the
//! snapshot. The step has no on-disk effect, so it is never satisfied and
//! runs on every boot.

use super::{InitCtx, log_task_error};
use crate::pipeline::{Criticality, PipelineTask, TaskOutput};
use async_trait::async_trait;
use podboot_shared::errors::{PodbootError, PodbootResult};

pub struct CredentialsTask {
    pub name: String,
    pub criticality: Criticality,
    pub required: Vec<String>,
    pub optional: Vec<String>,
}

impl CredentialsTask {
    async fn capture(&self, ctx: &InitCtx) -> PodbootResult<()> {
        let mut ctx = ctx.lock().await;
        let mut missing = Vec::new();

        for key in &self.required {
            let value = ctx.process_var(key).map(str::to_string);
            match value {
                Some(value) => ctx.snapshot.set(key.as_str(), value)?,
                None => missing.push(key.as_str()),
            }
        }

        for key in &self.optional {
            let value = ctx.process_var(key).map(str::to_string);
            match value {
                Some(value) => ctx.snapshot.set(key.as_str(), value)?,
                None => tracing::info!(
                    variable = %key,
                    "Optional credential not set, dependent features disabled"
                ),
            }
        }

        if !missing.is_empty() {
            return Err(PodbootError::step(
                &self.name,
                format!("required variables not set: {}", missing.join(", ")),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineTask<InitCtx> for CredentialsTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn criticality(&self) -> Criticality {
        self.criticality
    }

    async fn is_satisfied(&self, _ctx: InitCtx) -> PodbootResult<bool> {
        Ok(false)
    }

    async fn on_satisfied(&self, ctx: InitCtx) -> PodbootResult<()> {
        self.capture(&ctx).await
    }

    async fn run(&self, ctx: InitCtx) -> PodbootResult<TaskOutput> {
        self.capture(&ctx)
            .await
            .inspect_err(|e| log_task_error(&self.name, e))?;
        Ok(TaskOutput::done())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootConfig;
    use crate::init::types::InitContext;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn ctx_with(env: &[(&str, &str)]) -> InitCtx {
        let process_env: BTreeMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(Mutex::new(InitContext::new(
            Arc::new(BootConfig::default()),
            process_env,
        )))
    }

    fn task(required: &[&str], optional: &[&str]) -> CredentialsTask {
        CredentialsTask {
            name: "credentials".into(),
            criticality: Criticality::Critical,
            required: required.iter().map(|s| s.to_string()).collect(),
            optional: optional.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_missing_optional_is_not_an_error() {
        let ctx = ctx_with(&[("GITHUB_TOKEN", "ghp_x")]);
        task(&[], &["GITHUB_TOKEN", "BRAVE_API_KEY"])
            .run(ctx.clone())
            .await
            .unwrap();

        let ctx = ctx.lock().await;
        assert_eq!(ctx.snapshot.get("GITHUB_TOKEN"), Some("ghp_x"));
        assert_eq!(ctx.snapshot.get("BRAVE_API_KEY"), None);
    }

    #[tokio::test]
    async fn test_missing_required_fails() {
        let ctx = ctx_with(&[("ANTHROPIC_API_KEY", "")]);
        let err = task(&["ANTHROPIC_API_KEY"], &[]).run(ctx).await.unwrap_err();
        assert!(err.to_string().contains("ANTHROPIC_API_KEY"));
    }

    #[tokio::test]
    async fn test_never_satisfied() {
        let ctx = ctx_with(&[]);
        assert!(!task(&[], &[]).is_satisfied(ctx).await.unwrap());
    }
}
