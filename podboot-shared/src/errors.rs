//! Error taxonomy for podboot.
//!
//! Init failures are classified where they happen: a step error becomes
//! either a [`PodbootError::CriticalInitFailure`] (aborts startup) or is
//! logged as best-effort by the runner and never surfaces here.

use thiserror::Error;

/// Result type for podboot operations.
pub type PodbootResult<T> = Result<T, PodbootError>;

#[derive(Error, Debug)]
pub enum PodbootError {
    /// Invalid or inconsistent configuration.
    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Boot journal failure.
    #[error("database error: {0}")]
    Database(String),

    /// A single init step failed to do its work.
    #[error("step '{step}' failed: {message}")]
    Step { step: String, message: String },

    /// Every alternative action of a step failed.
    #[error("step '{step}': all {} alternatives failed: {}", attempts.len(), attempts.join("; "))]
    AlternativesExhausted { step: String, attempts: Vec<String> },

    /// A critical step failed; no services will be started.
    #[error("critical init step '{step}' (phase {phase}) failed: {message}")]
    CriticalInitFailure {
        step: String,
        phase: u32,
        message: String,
    },

    /// A supervised service exited unexpectedly.
    #[error("service '{service}' crashed: {message}")]
    ServiceCrash { service: String, message: String },

    /// A service never passed its readiness check.
    #[error("service '{service}' not ready after {timeout_ms}ms")]
    ReadinessTimeout { service: String, timeout_ms: u64 },

    /// Operation not allowed in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PodbootError {
    /// Shorthand for [`PodbootError::Step`].
    pub fn step(step: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Step {
            step: step.into(),
            message: message.into(),
        }
    }
}
