//! Service supervisor.
//!
//! ## Architecture
//!
//! ```text
//! Supervisor::start ──spawn──▶ ServiceRunner (one tokio task per service)
//!        │                         │ spawn child with explicit env
//!        │                         │ wait ─▶ classify exit ─▶ restart per policy
//!        ▼                         ▼
//! SupervisorHandle ◀──states── Arc<Mutex<BTreeMap<name, ServiceState>>>
//!   wait_ready()  checks every service's readiness check concurrently
//!   shutdown()    SIGTERM → SIGKILL after stop_timeout
//! ```
//!
//! Starting a service is fire-and-forget; nothing blocks the supervisor
//! itself while a service crash-loops.

mod backoff;
mod readiness;
mod service;

pub use backoff::{restart_delay_ms, with_jitter};
pub use readiness::{CHECK_INTERVAL, ReadinessCheck};
pub use service::{RestartPolicy, ServiceDescriptor, ServicePhase, ServiceState};

use crate::util::Ownership;
use futures::future::join_all;
use parking_lot::Mutex;
use podboot_shared::errors::PodbootResult;
use service::{ServiceRunner, SharedStates};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Configured but not yet started set of services.
pub struct Supervisor {
    services: Vec<ServiceDescriptor>,
    env: Vec<(String, String)>,
    owner: Option<Ownership>,
    stop_timeout: Duration,
}

impl Supervisor {
    /// `env` is passed verbatim to every service; nothing is inherited.
    pub fn new(
        services: Vec<ServiceDescriptor>,
        env: Vec<(String, String)>,
        owner: Option<Ownership>,
        stop_timeout: Duration,
    ) -> Self {
        Self {
            services,
            env,
            owner,
            stop_timeout,
        }
    }

    /// Spawn every service and return immediately.
    pub fn start(self) -> SupervisorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let states: SharedStates = Arc::new(Mutex::new(
            self.services
                .iter()
                .map(|s| (s.name.clone(), ServiceState::default()))
                .collect(),
        ));
        let env = Arc::new(self.env);

        let tasks = self
            .services
            .iter()
            .cloned()
            .map(|descriptor| {
                let runner = ServiceRunner {
                    descriptor,
                    env: Arc::clone(&env),
                    owner: self.owner,
                    stop_timeout: self.stop_timeout,
                    states: Arc::clone(&states),
                    shutdown: shutdown_rx.clone(),
                };
                tokio::spawn(runner.run())
            })
            .collect();

        tracing::info!(services = self.services.len(), "Supervisor started");

        SupervisorHandle {
            descriptors: self.services,
            env,
            states,
            shutdown_tx,
            tasks,
        }
    }
}

/// Handle to running services.
pub struct SupervisorHandle {
    descriptors: Vec<ServiceDescriptor>,
    env: Arc<Vec<(String, String)>>,
    states: SharedStates,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SupervisorHandle {
    /// Copy of every service's current state.
    pub fn states(&self) -> BTreeMap<String, ServiceState> {
        self.states.lock().clone()
    }

    pub fn state(&self, service: &str) -> Option<ServiceState> {
        self.states.lock().get(service).cloned()
    }

    pub fn restarts(&self, service: &str) -> u64 {
        self.state(service).map(|s| s.restarts).unwrap_or(0)
    }

    /// Wait until every service passes its readiness check.
    ///
    /// Services are checked concurrently, each bounded by `timeout`. Every
    /// service that misses the deadline is logged; the first one is returned
    /// as `PodbootError::ReadinessTimeout`.
    pub async fn wait_ready(&self, timeout: Duration) -> PodbootResult<()> {
        let checks = self.descriptors.iter().map(|d| async move {
            let result = d.readiness.wait(&d.name, &self.env, timeout).await;
            (d.name.as_str(), result)
        });

        let mut first_failure = None;
        for (name, result) in join_all(checks).await {
            match result {
                Ok(elapsed) => {
                    tracing::info!(service = %name, elapsed_ms = elapsed.as_millis() as u64, "Service ready");
                    if let Some(state) = self.states.lock().get_mut(name) {
                        state.ready = true;
                    }
                }
                Err(e) => {
                    tracing::error!(service = %name, classification = "readiness_timeout", "{}", e);
                    first_failure.get_or_insert(e);
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop every service and wait for the restart loops to finish.
    pub async fn shutdown(self) {
        tracing::info!("Stopping supervised services");
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!("Service task ended abnormally: {}", e);
            }
        }
    }
}
