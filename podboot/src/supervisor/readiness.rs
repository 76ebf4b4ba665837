//! Readiness checks for supervised services.

use crate::util::run_command;
use podboot_shared::errors::{PodbootError, PodbootResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Interval between readiness checks.
pub const CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Upper bound for a single check while a running service is re-checked.
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// How a service proves it is ready.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessCheck {
    /// Ready as soon as it is running.
    #[default]
    None,
    /// A TCP port accepts connections.
    Tcp {
        #[serde(default = "default_host")]
        host: String,
        port: u16,
    },
    /// A command exits with status 0.
    Command { argv: Vec<String> },
    /// A file or socket exists.
    Path { path: PathBuf },
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

impl ReadinessCheck {
    /// Run the check once.
    pub async fn check_once(&self, env: &[(String, String)]) -> bool {
        match self {
            ReadinessCheck::None => true,
            ReadinessCheck::Tcp { host, port } => matches!(
                tokio::time::timeout(
                    Duration::from_secs(1),
                    tokio::net::TcpStream::connect((host.as_str(), *port)),
                )
                .await,
                Ok(Ok(_))
            ),
            ReadinessCheck::Command { argv } => run_command(argv, env, None).await.is_ok(),
            ReadinessCheck::Path { path } => path.exists(),
        }
    }

    /// Check until the service passes, with no overall deadline.
    pub async fn until_ready(&self, env: &[(String, String)]) {
        loop {
            if let Ok(true) = tokio::time::timeout(CHECK_TIMEOUT, self.check_once(env)).await {
                return;
            }
            tokio::time::sleep(CHECK_INTERVAL).await;
        }
    }

    /// Check until the service passes or `timeout` elapses.
    ///
    /// Returns how long it took to become ready.
    pub async fn wait(
        &self,
        service: &str,
        env: &[(String, String)],
        timeout: Duration,
    ) -> PodbootResult<Duration> {
        let start = Instant::now();
        loop {
            // A check never outlives the deadline; dropping a command check kills its child.
            let remaining = timeout.saturating_sub(start.elapsed());
            if let Ok(true) = tokio::time::timeout(remaining, self.check_once(env)).await {
                return Ok(start.elapsed());
            }
            if start.elapsed() >= timeout {
                return Err(PodbootError::ReadinessTimeout {
                    service: service.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(CHECK_INTERVAL.min(timeout.saturating_sub(start.elapsed()))).await;
        }
    }
}
