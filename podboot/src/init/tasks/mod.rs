//! Init step implementations.
//!
//! Each configured [`StepKind`] maps to one task type. The publish step is
//! appended by the plan builder and never appears in configuration.

mod authorized_keys;
mod command;
mod credentials;
mod directories;
mod mcp_servers;
mod profile_hook;
mod publish;
mod sshd_config;

pub use authorized_keys::AuthorizedKeysTask;
pub use command::CommandTask;
pub use credentials::CredentialsTask;
pub use directories::DirectoriesTask;
pub use mcp_servers::McpServersTask;
pub use profile_hook::ProfileHookTask;
pub use publish::PublishEnvironmentTask;
pub use sshd_config::SshdConfigTask;

pub use super::types::InitCtx;

use crate::config::{StepConfig, StepKind};
use crate::pipeline::BoxedTask;
use podboot_shared::errors::PodbootError;

/// Build the task for a configured step.
pub(crate) fn task_for_step(step: &StepConfig) -> BoxedTask<InitCtx> {
    let name = step.name.clone();
    let criticality = step.criticality;
    match &step.kind {
        StepKind::Credentials { required, optional } => Box::new(CredentialsTask {
            name,
            criticality,
            required: required.clone(),
            optional: optional.clone(),
        }),
        StepKind::Directories { paths } => Box::new(DirectoriesTask {
            name,
            criticality,
            paths: paths.clone(),
        }),
        StepKind::AuthorizedKeys {
            source_file,
            source_env,
            target,
        } => Box::new(AuthorizedKeysTask {
            name,
            criticality,
            source_file: source_file.clone(),
            source_env: source_env.clone(),
            target: target.clone(),
        }),
        StepKind::SshdConfig { path, port } => Box::new(SshdConfigTask {
            name,
            criticality,
            path: path.clone(),
            port: *port,
        }),
        StepKind::ProfileHook { path } => Box::new(ProfileHookTask {
            name,
            criticality,
            path: path.clone(),
        }),
        StepKind::Command {
            creates,
            binary,
            check,
            alternatives,
            path,
            env,
            run_as_owner,
        } => Box::new(CommandTask {
            name,
            criticality,
            creates: creates.clone(),
            binary: binary.clone(),
            check: check.clone(),
            alternatives: alternatives.clone(),
            path: path.clone(),
            env: env.clone(),
            run_as_owner: *run_as_owner,
        }),
        StepKind::McpServers { config_path } => Box::new(McpServersTask {
            name,
            criticality,
            config_path: config_path.clone(),
        }),
    }
}

/// Log task failure with context.
pub(crate) fn log_task_error(task_name: &str, error: &PodbootError) {
    tracing::debug!(step = task_name, "Step action failed: {}", error);
}
