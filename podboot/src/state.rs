//! Bootstrap lifecycle state and the status file.
//!
//! ```text
//! Init ──▶ StartingServices ──▶ Ready
//!   │
//!   └──▶ Failed   (critical init step failed)
//! ```

use crate::supervisor::ServiceState;
use crate::util::write_atomic;
use chrono::{DateTime, Utc};
use podboot_shared::errors::{PodbootError, PodbootResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const STATUS_FILE: &str = "status.json";

/// Lifecycle status of the container bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootStatus {
    /// Running one-time init steps.
    Init,
    /// Init done; services started, waiting for readiness.
    StartingServices,
    /// Every service passed its readiness check.
    Ready,
    /// A critical init step failed. Terminal.
    Failed,
}

impl BootStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BootStatus::Init => "init",
            BootStatus::StartingServices => "starting_services",
            BootStatus::Ready => "ready",
            BootStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(&self, next: BootStatus) -> bool {
        matches!(
            (self, next),
            (BootStatus::Init, BootStatus::StartingServices)
                | (BootStatus::Init, BootStatus::Failed)
                | (BootStatus::StartingServices, BootStatus::Ready)
        )
    }
}

/// Persisted view of the bootstrap for health checks and other processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub boot_id: String,
    pub status: BootStatus,
    /// False after a readiness timeout; an external orchestrator decides what to do.
    pub healthy: bool,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub failure: Option<String>,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceState>,
}

impl StatusReport {
    pub fn load(state_dir: &Path) -> PodbootResult<Self> {
        let path = Self::path(state_dir);
        let bytes = std::fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PodbootError::NotFound(format!("status file {}", path.display()))
            } else {
                PodbootError::Io(e)
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn path(state_dir: &Path) -> PathBuf {
        state_dir.join(STATUS_FILE)
    }
}

/// Owns the current status and persists every change.
pub struct BootState {
    state_dir: PathBuf,
    report: StatusReport,
}

impl BootState {
    /// Start a new boot in `Init` and write the status file.
    pub fn begin(state_dir: &Path, boot_id: &str) -> PodbootResult<Self> {
        let state = Self {
            state_dir: state_dir.to_path_buf(),
            report: StatusReport {
                boot_id: boot_id.to_string(),
                status: BootStatus::Init,
                healthy: true,
                updated_at: Utc::now(),
                failure: None,
                services: BTreeMap::new(),
            },
        };
        state.save()?;
        Ok(state)
    }

    pub fn status(&self) -> BootStatus {
        self.report.status
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: BootStatus) -> PodbootResult<()> {
        let current = self.report.status;
        if !current.can_transition_to(next) {
            return Err(PodbootError::InvalidState(format!(
                "cannot move from {} to {}",
                current.as_str(),
                next.as_str()
            )));
        }
        tracing::info!(from = current.as_str(), to = next.as_str(), "Boot state transition");
        self.report.status = next;
        self.touch()
    }

    /// Enter `Failed` with the reason recorded.
    pub fn fail(&mut self, reason: &PodbootError) -> PodbootResult<()> {
        self.report.failure = Some(reason.to_string());
        self.report.healthy = false;
        self.transition(BootStatus::Failed)
    }

    /// Mark unhealthy without changing the lifecycle status.
    pub fn mark_unhealthy(&mut self, reason: &PodbootError) -> PodbootResult<()> {
        self.report.failure = Some(reason.to_string());
        self.report.healthy = false;
        self.touch()
    }

    pub fn update_services(&mut self, services: BTreeMap<String, ServiceState>) -> PodbootResult<()> {
        if self.report.services == services {
            return Ok(());
        }
        self.report.services = services;
        self.touch()
    }

    fn touch(&mut self) -> PodbootResult<()> {
        self.report.updated_at = Utc::now();
        self.save()
    }

    fn save(&self) -> PodbootResult<()> {
        write_atomic(
            &StatusReport::path(&self.state_dir),
            &serde_json::to_vec_pretty(&self.report)?,
            0o644,
        )
    }
}
