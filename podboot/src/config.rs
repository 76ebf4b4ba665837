//! Bootstrap configuration.
//!
//! Loaded once at startup from a JSON file. Every field has a default, so a
//! missing file yields the built-in development container plan: credentials,
//! home directories, SSH access and an `sshd` service on port 2222.

use crate::mcp::McpServerDescriptor;
use crate::pipeline::{Criticality, Phase};
use crate::supervisor::{ReadinessCheck, RestartPolicy, ServiceDescriptor};
use crate::util::Ownership;
use podboot_shared::errors::{PodbootError, PodbootResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Config file used when no path is given and the file exists.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/podboot/config.json";

/// Reserved name of the step that publishes the environment snapshot.
pub const PUBLISH_STEP: &str = "publish_environment";

pub const DEFAULT_SSH_PORT: u16 = 2222;

/// Login-shell hook that sources the published profile.
pub const DEFAULT_PROFILE_HOOK: &str = "/etc/profile.d/podboot.sh";

/// Whether already-completed steps are re-checked on the next boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RerunPolicy {
    /// Always evaluate the idempotence predicate.
    #[default]
    Check,
    /// Skip steps the journal records as completed.
    SkipCompleted,
}

/// A directory ensured by a `directories` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectorySpec {
    pub path: PathBuf,
    #[serde(default = "default_dir_mode")]
    pub mode: u32,
    /// Prepend this directory to the snapshot PATH.
    #[serde(default)]
    pub on_path: bool,
}

fn default_dir_mode() -> u32 {
    0o755
}

fn default_profile_hook() -> PathBuf {
    PathBuf::from(DEFAULT_PROFILE_HOOK)
}

/// What a step does.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    /// Copy variables from the container environment into the snapshot.
    Credentials {
        #[serde(default)]
        required: Vec<String>,
        #[serde(default)]
        optional: Vec<String>,
    },
    Directories { paths: Vec<DirectorySpec> },
    /// Install public keys for remote login.
    AuthorizedKeys {
        #[serde(default)]
        source_file: Option<PathBuf>,
        #[serde(default)]
        source_env: Option<String>,
        target: PathBuf,
    },
    /// sshd drop-in enforcing key-only authentication.
    SshdConfig { path: PathBuf, port: u16 },
    /// Login-shell hook sourcing the published profile from the state directory.
    ProfileHook {
        #[serde(default = "default_profile_hook")]
        path: PathBuf,
    },
    /// External command with ordered fallback alternatives.
    Command {
        #[serde(default)]
        creates: Option<PathBuf>,
        #[serde(default)]
        binary: Option<String>,
        #[serde(default)]
        check: Option<Vec<String>>,
        alternatives: Vec<Vec<String>>,
        #[serde(default)]
        path: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        /// Run as the configured execution account instead of the supervisor's user.
        #[serde(default)]
        run_as_owner: bool,
    },
    /// Verify MCP server commands and variables.
    McpServers {
        #[serde(default)]
        config_path: Option<PathBuf>,
    },
}

/// One declared init step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepConfig {
    pub name: String,
    pub phase: Phase,
    #[serde(default)]
    pub criticality: Criticality,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// Top-level bootstrap configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    /// Snapshot, status file, journal and logs live here.
    pub state_dir: PathBuf,
    /// Home directory of the execution account.
    pub home_dir: PathBuf,
    /// Numeric owner for created files and `run_as_owner` services.
    pub owner: Option<Ownership>,
    pub rerun_policy: RerunPolicy,
    /// Publish the snapshot as 0644 instead of 0600.
    pub world_readable_env: bool,
    /// Also log to a daily-rolling file under `<state_dir>/logs`.
    pub log_to_file: bool,
    /// PATH every snapshot is layered on.
    pub base_path: String,
    pub steps: Vec<StepConfig>,
    pub services: Vec<ServiceDescriptor>,
    pub mcp_servers: BTreeMap<String, McpServerDescriptor>,
    pub readiness_timeout_ms: u64,
    pub stop_timeout_ms: u64,
}

impl Default for BootConfig {
    fn default() -> Self {
        let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/root"));
        Self {
            state_dir: PathBuf::from("/var/lib/podboot"),
            steps: default_steps(&home_dir),
            services: default_services(),
            home_dir,
            owner: None,
            rerun_policy: RerunPolicy::default(),
            world_readable_env: false,
            log_to_file: false,
            base_path: "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin".to_string(),
            mcp_servers: BTreeMap::new(),
            readiness_timeout_ms: 30_000,
            stop_timeout_ms: 10_000,
        }
    }
}

fn default_steps(home: &Path) -> Vec<StepConfig> {
    vec![
        StepConfig {
            name: "credentials".into(),
            phase: Phase::ENVIRONMENT,
            criticality: Criticality::Critical,
            kind: StepKind::Credentials {
                required: vec![],
                optional: [
                    "ANTHROPIC_API_KEY",
                    "OPENAI_API_KEY",
                    "GEMINI_API_KEY",
                    "GITHUB_TOKEN",
                    "BRAVE_API_KEY",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
            },
        },
        StepConfig {
            name: "home_directories".into(),
            phase: Phase::ENVIRONMENT,
            criticality: Criticality::Critical,
            kind: StepKind::Directories {
                paths: vec![
                    DirectorySpec {
                        path: home.join(".ssh"),
                        mode: 0o700,
                        on_path: false,
                    },
                    DirectorySpec {
                        path: home.join(".local/bin"),
                        mode: 0o755,
                        on_path: true,
                    },
                ],
            },
        },
        StepConfig {
            name: "authorized_keys".into(),
            phase: Phase::SYSTEM,
            // Without key material sshd still runs; nobody can log in until the secret is mounted.
            criticality: Criticality::BestEffort,
            kind: StepKind::AuthorizedKeys {
                source_file: Some(PathBuf::from("/etc/podboot/secrets/authorized_keys")),
                source_env: Some("SSH_AUTHORIZED_KEYS".into()),
                target: home.join(".ssh/authorized_keys"),
            },
        },
        StepConfig {
            name: "ssh_host_keys".into(),
            phase: Phase::SYSTEM,
            criticality: Criticality::Critical,
            kind: StepKind::Command {
                creates: Some(PathBuf::from("/etc/ssh/ssh_host_ed25519_key")),
                binary: None,
                check: None,
                alternatives: vec![vec!["ssh-keygen".into(), "-A".into()]],
                path: vec![],
                env: BTreeMap::new(),
                run_as_owner: false,
            },
        },
        StepConfig {
            name: "sshd_config".into(),
            phase: Phase::SYSTEM,
            criticality: Criticality::Critical,
            kind: StepKind::SshdConfig {
                path: PathBuf::from("/etc/ssh/sshd_config.d/podboot.conf"),
                port: DEFAULT_SSH_PORT,
            },
        },
        StepConfig {
            name: "profile_hook".into(),
            phase: Phase::SYSTEM,
            criticality: Criticality::Critical,
            kind: StepKind::ProfileHook {
                path: default_profile_hook(),
            },
        },
        StepConfig {
            name: "mcp_servers".into(),
            phase: Phase::FINALIZE,
            criticality: Criticality::BestEffort,
            kind: StepKind::McpServers { config_path: None },
        },
    ]
}

fn default_services() -> Vec<ServiceDescriptor> {
    let mut sshd = ServiceDescriptor::new(
        "sshd",
        vec!["/usr/sbin/sshd".into(), "-D".into(), "-e".into()],
    );
    sshd.restart = RestartPolicy::Always;
    sshd.readiness = ReadinessCheck::Tcp {
        host: "127.0.0.1".into(),
        port: DEFAULT_SSH_PORT,
    };
    sshd.depends_on = vec![
        "ssh_host_keys".into(),
        "sshd_config".into(),
        "authorized_keys".into(),
    ];
    vec![sshd]
}

impl BootConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, [`DEFAULT_CONFIG_PATH`] is
    /// used when present and the built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> PodbootResult<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                if !default.exists() {
                    tracing::debug!("No config file at {}, using defaults", DEFAULT_CONFIG_PATH);
                    return Ok(Self::default());
                }
                default
            }
        };

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            PodbootError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        let config: BootConfig = serde_json::from_str(&contents).map_err(|e| {
            PodbootError::Config(format!("Failed to parse config {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), steps = config.steps.len(), services = config.services.len(), "Loaded config");
        Ok(config)
    }

    /// Apply `PODBOOT_UID` / `PODBOOT_GID` from the container environment.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> PodbootResult<()> {
        let parse = |key: &str| -> PodbootResult<Option<u32>> {
            lookup(key)
                .map(|v| {
                    v.trim().parse::<u32>().map_err(|_| {
                        PodbootError::Config(format!("{} must be a numeric id, got '{}'", key, v))
                    })
                })
                .transpose()
        };

        match (parse("PODBOOT_UID")?, parse("PODBOOT_GID")?) {
            (Some(uid), Some(gid)) => self.owner = Some(Ownership { uid, gid }),
            (Some(uid), None) => self.owner = Some(Ownership { uid, gid: uid }),
            (None, Some(_)) => {
                return Err(PodbootError::Config(
                    "PODBOOT_GID is set without PODBOOT_UID".into(),
                ));
            }
            (None, None) => {}
        }
        Ok(())
    }

    /// Reject configurations that cannot run correctly.
    pub fn validate(&self) -> PodbootResult<()> {
        let mut step_names = HashSet::new();
        for step in &self.steps {
            if step.name.is_empty() {
                return Err(PodbootError::Config("step with empty name".into()));
            }
            if step.name == PUBLISH_STEP {
                return Err(PodbootError::Config(format!(
                    "step name '{}' is reserved",
                    PUBLISH_STEP
                )));
            }
            if !step_names.insert(step.name.as_str()) {
                return Err(PodbootError::Config(format!(
                    "duplicate step name '{}'",
                    step.name
                )));
            }
            if step.phase > Phase::FINALIZE {
                return Err(PodbootError::Config(format!(
                    "step '{}' has phase {} after finalize; it would run after the environment is published",
                    step.name, step.phase
                )));
            }
            if let StepKind::Command {
                alternatives,
                check,
                ..
            } = &step.kind
            {
                if alternatives.is_empty() || alternatives.iter().any(Vec::is_empty) {
                    return Err(PodbootError::Config(format!(
                        "step '{}' needs at least one non-empty alternative",
                        step.name
                    )));
                }
                if check.as_ref().is_some_and(Vec::is_empty) {
                    return Err(PodbootError::Config(format!(
                        "step '{}' has an empty check command",
                        step.name
                    )));
                }
            }
        }

        let mut service_names = HashSet::new();
        for service in &self.services {
            if !service_names.insert(service.name.as_str()) {
                return Err(PodbootError::Config(format!(
                    "duplicate service name '{}'",
                    service.name
                )));
            }
            if service.command.is_empty() {
                return Err(PodbootError::Config(format!(
                    "service '{}' has an empty command",
                    service.name
                )));
            }
            for dep in &service.depends_on {
                if dep != PUBLISH_STEP && !step_names.contains(dep.as_str()) {
                    return Err(PodbootError::Config(format!(
                        "service '{}' depends on unknown step '{}'",
                        service.name, dep
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn readiness_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn stop_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.state_dir.join("journal.db")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }
}
