//! Type definitions for the init pipeline.

use crate::config::{BootConfig, PUBLISH_STEP, RerunPolicy};
use crate::db::JournalStore;
use crate::env::{EnvironmentSnapshot, PublishedEnvironment};
use crate::pipeline::{PipelineObserver, TaskMetrics};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Shared init pipeline context.
///
/// Owned exclusively by the init phase. Tasks lock it briefly to read
/// configuration and to add entries to the snapshot.
pub struct InitContext {
    pub config: Arc<BootConfig>,
    /// Container environment as seen at startup.
    pub process_env: BTreeMap<String, String>,
    pub snapshot: EnvironmentSnapshot,
    /// Set by the publish step.
    pub published: Option<PublishedEnvironment>,
}

impl InitContext {
    pub fn new(config: Arc<BootConfig>, process_env: BTreeMap<String, String>) -> Self {
        Self {
            config,
            process_env,
            snapshot: EnvironmentSnapshot::new(),
            published: None,
        }
    }

    /// Non-empty value of a container environment variable.
    pub fn process_var(&self, key: &str) -> Option<&str> {
        self.process_env
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

pub type InitCtx = Arc<Mutex<InitContext>>;

/// Records every step outcome in the boot journal and implements the rerun policy.
pub struct JournalObserver {
    journal: JournalStore,
    boot_id: String,
    completed: HashSet<String>,
}

impl JournalObserver {
    /// `completed` is only consulted under [`RerunPolicy::SkipCompleted`].
    pub fn new(journal: JournalStore, boot_id: String, policy: RerunPolicy) -> Self {
        let completed = match policy {
            RerunPolicy::Check => HashSet::new(),
            RerunPolicy::SkipCompleted => journal.completed_steps().unwrap_or_else(|e| {
                tracing::warn!("Failed to read completed steps from journal: {}", e);
                HashSet::new()
            }),
        };
        Self {
            journal,
            boot_id,
            completed,
        }
    }
}

impl PipelineObserver for JournalObserver {
    fn should_skip(&self, task: &str) -> bool {
        task != PUBLISH_STEP && self.completed.contains(task)
    }

    fn record(&self, task: &TaskMetrics) {
        if let Err(e) = self.journal.record_step(&self.boot_id, task) {
            tracing::warn!(step = %task.name, "Failed to journal step outcome: {}", e);
        }
    }
}
