//! Task: Authorized keys.
//!
//! Installs public keys for remote login from a mounted secret file or an
//! environment variable. The target file is replaced atomically, so a
//! concurrent sshd never reads a partial key list.

use super::{InitCtx, log_task_error};
use crate::pipeline::{Criticality, PipelineTask, TaskOutput};
use crate::util::{chown_path, write_atomic};
use async_trait::async_trait;
use podboot_shared::errors::{PodbootError, PodbootResult};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

pub struct AuthorizedKeysTask {
    pub name: String,
    pub criticality: Criticality,
    pub source_file: Option<PathBuf>,
    pub source_env: Option<String>,
    pub target: PathBuf,
}

impl AuthorizedKeysTask {
    /// Key material from the first source that has any, normalized.
    async fn material(&self, ctx: &InitCtx) -> PodbootResult<Option<String>> {
        if let Some(file) = &self.source_file
            && file.is_file()
        {
            let content = tokio::fs::read_to_string(file).await?;
            if let Some(keys) = normalize_keys(&content) {
                return Ok(Some(keys));
            }
            tracing::warn!(file = %file.display(), "Key file has no usable keys");
        }

        if let Some(var) = &self.source_env {
            let ctx = ctx.lock().await;
            if let Some(keys) = ctx.process_var(var).and_then(normalize_keys) {
                return Ok(Some(keys));
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl PipelineTask<InitCtx> for AuthorizedKeysTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn criticality(&self) -> Criticality {
        self.criticality
    }

    async fn is_satisfied(&self, ctx: InitCtx) -> PodbootResult<bool> {
        if !self.target.is_file() {
            return Ok(false);
        }
        match self.material(&ctx).await? {
            Some(keys) => Ok(tokio::fs::read_to_string(&self.target).await? == keys),
            // Keys installed by an earlier boot stay in place.
            None => Ok(true),
        }
    }

    async fn on_satisfied(&self, _ctx: InitCtx) -> PodbootResult<()> {
        Ok(())
    }

    async fn run(&self, ctx: InitCtx) -> PodbootResult<TaskOutput> {
        let keys = self.material(&ctx).await?.ok_or_else(|| {
            PodbootError::step(
                &self.name,
                "no key material: source file missing and variable not set",
            )
        })?;
        let owner = ctx.lock().await.config.owner;

        let install = || -> PodbootResult<()> {
            if let Some(ssh_dir) = self.target.parent() {
                std::fs::create_dir_all(ssh_dir)?;
                std::fs::set_permissions(ssh_dir, std::fs::Permissions::from_mode(0o700))?;
                chown_path(ssh_dir, owner)?;
            }
            write_atomic(&self.target, keys.as_bytes(), 0o600)?;
            chown_path(&self.target, owner)
        };
        install().inspect_err(|e| log_task_error(&self.name, e))?;

        tracing::info!(
            target = %self.target.display(),
            keys = keys.lines().count(),
            "Installed authorized keys"
        );
        Ok(TaskOutput::done())
    }
}

/// Trim blank lines and comments. `None` when no key remains.
fn normalize_keys(raw: &str) -> Option<String> {
    let keys: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();
    if keys.is_empty() {
        return None;
    }
    Some(format!("{}\n", keys.join("\n")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BootConfig;
    use crate::init::types::InitContext;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    const KEY: &str = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIBx dev@laptop";

    fn ctx(env: &[(&str, &str)]) -> InitCtx {
        let process_env = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>();
        Arc::new(Mutex::new(InitContext::new(
            Arc::new(BootConfig::default()),
            process_env,
        )))
    }

    fn task(dir: &TempDir) -> AuthorizedKeysTask {
        AuthorizedKeysTask {
            name: "authorized_keys".into(),
            criticality: Criticality::Critical,
            source_file: Some(dir.path().join("secret/authorized_keys")),
            source_env: Some("SSH_AUTHORIZED_KEYS".into()),
            target: dir.path().join("home/.ssh/authorized_keys"),
        }
    }

    #[tokio::test]
    async fn test_installs_exactly_one_file_and_second_run_is_noop() {
        let dir = TempDir::new().unwrap();
        let task = task(&dir);
        let ctx = ctx(&[("SSH_AUTHORIZED_KEYS", KEY)]);

        assert!(!task.is_satisfied(ctx.clone()).await.unwrap());
        task.run(ctx.clone()).await.unwrap();

        let ssh_dir = dir.path().join("home/.ssh");
        let entries: Vec<_> = std::fs::read_dir(&ssh_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let meta = std::fs::metadata(&task.target).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        let dir_mode = std::fs::metadata(&ssh_dir).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);
        let modified = meta.modified().unwrap();

        assert!(task.is_satisfied(ctx.clone()).await.unwrap());
        assert_eq!(
            std::fs::metadata(&task.target).unwrap().modified().unwrap(),
            modified
        );
    }

    #[tokio::test]
    async fn test_file_source_wins_over_env() {
        let dir = TempDir::new().unwrap();
        let task = task(&dir);
        std::fs::create_dir_all(dir.path().join("secret")).unwrap();
        std::fs::write(
            dir.path().join("secret/authorized_keys"),
            format!("# team keys\n\n{}\n", KEY),
        )
        .unwrap();

        task.run(ctx(&[("SSH_AUTHORIZED_KEYS", "ssh-rsa OTHER")]))
            .await
            .unwrap();

        let installed = std::fs::read_to_string(&task.target).unwrap();
        assert_eq!(installed, format!("{}\n", KEY));
    }

    #[tokio::test]
    async fn test_rotated_key_is_reinstalled() {
        let dir = TempDir::new().unwrap();
        let task = task(&dir);
        task.run(ctx(&[("SSH_AUTHORIZED_KEYS", KEY)])).await.unwrap();

        let rotated = ctx(&[("SSH_AUTHORIZED_KEYS", "ssh-ed25519 NEWKEY dev@laptop")]);
        assert!(!task.is_satisfied(rotated).await.unwrap());
    }

    #[tokio::test]
    async fn test_no_material_fails() {
        let dir = TempDir::new().unwrap();
        let err = task(&dir).run(ctx(&[])).await.unwrap_err();
        assert!(err.to_string().contains("no key material"));
    }
}
