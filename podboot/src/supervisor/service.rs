//! Service descriptors and the per-service restart loop.

use super::backoff::{restart_delay_ms, with_jitter};
use super::readiness::ReadinessCheck;
use crate::util::{Ownership, describe_exit, kill_process, terminate_process};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::watch;

/// When a service is restarted after it exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartPolicy {
    /// Restart on every exit.
    #[default]
    Always,
    /// Restart only on non-zero exit or signal death.
    OnFailure,
    /// Never restart.
    Never,
}

impl RestartPolicy {
    pub fn should_restart(&self, success: bool) -> bool {
        match self {
            RestartPolicy::Always => true,
            RestartPolicy::OnFailure => !success,
            RestartPolicy::Never => false,
        }
    }
}

/// Static description of a long-running service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    /// argv; the first element is resolved by the OS against the snapshot PATH.
    pub command: Vec<String>,
    #[serde(default)]
    pub restart: RestartPolicy,
    #[serde(default)]
    pub readiness: ReadinessCheck,
    /// Init steps that must have succeeded before this service may start.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
    #[serde(default = "default_max_restart_delay_ms")]
    pub max_restart_delay_ms: u64,
    /// Uptime after which the backoff counter resets.
    #[serde(default = "default_stable_after_ms")]
    pub stable_after_ms: u64,
    /// Run as the configured execution account instead of the supervisor's user.
    #[serde(default)]
    pub run_as_owner: bool,
}

fn default_restart_delay_ms() -> u64 {
    500
}

fn default_max_restart_delay_ms() -> u64 {
    30_000
}

fn default_stable_after_ms() -> u64 {
    10_000
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            command,
            restart: RestartPolicy::default(),
            readiness: ReadinessCheck::default(),
            depends_on: Vec::new(),
            restart_delay_ms: default_restart_delay_ms(),
            max_restart_delay_ms: default_max_restart_delay_ms(),
            stable_after_ms: default_stable_after_ms(),
            run_as_owner: false,
        }
    }
}

/// Where a service is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServicePhase {
    Starting,
    Running,
    /// Waiting out the restart delay.
    Backoff,
    /// Exited and the restart policy says to leave it down.
    Exited,
    /// Stopped by supervisor shutdown.
    Stopped,
}

/// Observable state of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceState {
    pub phase: ServicePhase,
    pub pid: Option<u32>,
    pub restarts: u64,
    pub last_exit: Option<String>,
    pub ready: bool,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self {
            phase: ServicePhase::Starting,
            pid: None,
            restarts: 0,
            last_exit: None,
            ready: false,
        }
    }
}

pub(crate) type SharedStates = Arc<Mutex<BTreeMap<String, ServiceState>>>;

/// Everything one service loop needs.
pub(crate) struct ServiceRunner {
    pub descriptor: ServiceDescriptor,
    pub env: Arc<Vec<(String, String)>>,
    pub owner: Option<Ownership>,
    pub stop_timeout: Duration,
    pub states: SharedStates,
    pub shutdown: watch::Receiver<bool>,
}

impl ServiceRunner {
    fn update(&self, f: impl FnOnce(&mut ServiceState)) {
        let mut states = self.states.lock();
        f(states.entry(self.descriptor.name.clone()).or_default());
    }

    fn build_command(&self) -> Command {
        let program = self
            .descriptor
            .command
            .first()
            .map(String::as_str)
            .unwrap_or_default();
        let args = self.descriptor.command.get(1..).unwrap_or_default();

        let mut cmd = Command::new(program);
        cmd.args(args)
            .env_clear()
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if self.descriptor.run_as_owner
            && let Some(owner) = self.owner
        {
            cmd.uid(owner.uid).gid(owner.gid);
        }

        cmd
    }

    /// Restart loop. Returns when the policy gives up or shutdown is requested.
    pub async fn run(mut self) {
        let name = self.descriptor.name.clone();
        let mut attempt: u32 = 0;

        loop {
            if *self.shutdown.borrow() {
                self.update(|s| s.phase = ServicePhase::Stopped);
                return;
            }

            self.update(|s| {
                s.phase = ServicePhase::Starting;
                s.pid = None;
            });

            let started = Instant::now();
            let (success, description) = match self.build_command().spawn() {
                Ok(mut child) => {
                    let pid = child.id();
                    tracing::info!(service = %name, pid = ?pid, "Service started");
                    self.update(|s| {
                        s.phase = ServicePhase::Running;
                        s.pid = pid;
                    });

                    // Re-checked on every start so the flag recovers after a restart.
                    let readiness = self.descriptor.readiness.clone();
                    let env = Arc::clone(&self.env);
                    let mut readiness_wait =
                        std::pin::pin!(async move { readiness.until_ready(&env).await });
                    let mut awaiting_ready = true;

                    loop {
                        tokio::select! {
                            status = child.wait() => break match status {
                                Ok(status) => (status.success(), describe_exit(status)),
                                Err(e) => (false, format!("wait failed: {}", e)),
                            },
                            _ = &mut readiness_wait, if awaiting_ready => {
                                awaiting_ready = false;
                                self.update(|s| s.ready = true);
                                tracing::debug!(service = %name, "Service passed readiness check");
                            }
                            _ = self.shutdown.changed() => {
                                stop_child(&name, &mut child, self.stop_timeout).await;
                                self.update(|s| {
                                    s.phase = ServicePhase::Stopped;
                                    s.pid = None;
                                });
                                return;
                            }
                        }
                    }
                }
                Err(e) => (false, format!("spawn failed: {}", e)),
            };

            if success {
                tracing::info!(service = %name, "Service exited: {}", description);
            } else {
                tracing::warn!(service = %name, classification = "service_crash", "Service exited: {}", description);
            }

            let restart = self.descriptor.restart.should_restart(success);
            self.update(|s| {
                s.pid = None;
                s.ready = false;
                s.last_exit = Some(description.clone());
                if !restart {
                    s.phase = ServicePhase::Exited;
                }
            });
            if !restart {
                tracing::info!(service = %name, policy = ?self.descriptor.restart, "Not restarting service");
                return;
            }

            if started.elapsed() >= Duration::from_millis(self.descriptor.stable_after_ms) {
                attempt = 0;
            }
            let delay = with_jitter(restart_delay_ms(
                attempt,
                self.descriptor.restart_delay_ms,
                self.descriptor.max_restart_delay_ms,
            ));
            attempt = attempt.saturating_add(1);

            let mut restarts = 0;
            self.update(|s| {
                s.phase = ServicePhase::Backoff;
                s.restarts += 1;
                restarts = s.restarts;
            });
            tracing::info!(service = %name, restart = restarts, delay_ms = delay, "Restarting service");

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                _ = self.shutdown.changed() => {
                    self.update(|s| s.phase = ServicePhase::Stopped);
                    return;
                }
            }
        }
    }
}

/// SIGTERM, then SIGKILL after `timeout`.
async fn stop_child(name: &str, child: &mut Child, timeout: Duration) {
    if let Some(pid) = child.id() {
        tracing::debug!(service = %name, pid, "Sending SIGTERM");
        terminate_process(pid);
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::info!(service = %name, "Service stopped: {}", describe_exit(status))
        }
        Ok(Err(e)) => tracing::warn!(service = %name, "Failed to wait for service: {}", e),
        Err(_) => {
            tracing::warn!(service = %name, timeout_ms = timeout.as_millis() as u64, "Service ignored SIGTERM, killing");
            let killed = child.id().map(kill_process).unwrap_or(true);
            if !killed {
                tracing::warn!(service = %name, "Failed to send SIGKILL");
            }
            if let Err(e) = child.wait().await {
                tracing::warn!(service = %name, "Failed to reap service: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy() {
        assert!(RestartPolicy::Always.should_restart(true));
        assert!(RestartPolicy::Always.should_restart(false));
        assert!(!RestartPolicy::OnFailure.should_restart(true));
        assert!(RestartPolicy::OnFailure.should_restart(false));
        assert!(!RestartPolicy::Never.should_restart(false));
    }

    #[test]
    fn test_descriptor_defaults_from_json() {
        let d: ServiceDescriptor =
            serde_json::from_str(r#"{"name":"sshd","command":["/usr/sbin/sshd","-D"]}"#)
                .unwrap();
        assert_eq!(d.restart, RestartPolicy::Always);
        assert_eq!(d.readiness, ReadinessCheck::None);
        assert_eq!(d.restart_delay_ms, 500);
        assert!(!d.run_as_owner);
    }
}
