//! Environment snapshot assembled during init.

use crate::util::{Ownership, chown_path, write_atomic};
use chrono::{DateTime, Utc};
use podboot_shared::errors::{PodbootError, PodbootResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

/// Bumped whenever the published JSON layout changes.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

pub const ENVIRONMENT_JSON: &str = "environment.json";
pub const ENVIRONMENT_PROFILE: &str = "environment.sh";

/// Mutable environment collected by init steps.
///
/// Sealed once published; every mutation after that fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    vars: BTreeMap<String, String>,
    path: Vec<String>,
    sealed: bool,
}

impl EnvironmentSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a variable. `PATH` must go through [`prepend_path`](Self::prepend_path).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> PodbootResult<()> {
        self.ensure_open()?;
        let key = key.into();
        validate_name(&key)?;
        if key == "PATH" {
            return Err(PodbootError::Config(
                "PATH is managed through path fragments".into(),
            ));
        }
        self.vars.insert(key, value.into());
        Ok(())
    }

    /// Add a PATH fragment. Earlier fragments take precedence; duplicates are ignored.
    pub fn prepend_path(&mut self, fragment: impl Into<String>) -> PodbootResult<()> {
        self.ensure_open()?;
        let fragment = fragment.into();
        if fragment.is_empty() || fragment.contains(':') {
            return Err(PodbootError::Config(format!(
                "invalid PATH fragment '{}'",
                fragment
            )));
        }
        if !self.path.contains(&fragment) {
            self.path.push(fragment);
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    pub fn path_fragments(&self) -> &[String] {
        &self.path
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Search path for resolving binaries during init: fragments, then `base`.
    pub fn search_path(&self, base: &str) -> String {
        merge_path(&self.path, base)
    }

    /// SHA-256 over the canonical JSON of vars and path fragments.
    pub fn digest(&self) -> String {
        #[derive(Serialize)]
        struct Canonical<'a> {
            vars: &'a BTreeMap<String, String>,
            path: &'a [String],
        }

        let canonical = serde_json::to_vec(&Canonical {
            vars: &self.vars,
            path: &self.path,
        })
        .unwrap_or_default();
        hex::encode(Sha256::digest(&canonical))
    }

    /// Published form of this snapshot.
    pub fn to_published(&self) -> PublishedEnvironment {
        PublishedEnvironment {
            version: SNAPSHOT_FORMAT_VERSION,
            digest: self.digest(),
            published_at: Utc::now(),
            vars: self.vars.clone(),
            path: self.path.clone(),
        }
    }

    /// True when `dir` already holds a publication of exactly this content,
    /// with the file mode and owner that [`publish`](Self::publish) would set.
    pub fn is_published_in(
        &self,
        dir: &Path,
        world_readable: bool,
        owner: Option<Ownership>,
    ) -> bool {
        let json_path = dir.join(ENVIRONMENT_JSON);
        let profile_path = dir.join(ENVIRONMENT_PROFILE);
        let mode = publish_mode(world_readable);
        if ![&json_path, &profile_path]
            .iter()
            .all(|path| has_mode_and_owner(path, mode, owner))
        {
            return false;
        }
        match PublishedEnvironment::load(&json_path) {
            Ok(existing) => existing.digest == self.digest(),
            Err(_) => false,
        }
    }

    /// Write the snapshot to `dir` and seal it.
    ///
    /// The JSON file is written before the profile so a profile never
    /// refers to content that is not yet on disk.
    pub fn publish(
        &mut self,
        dir: &Path,
        world_readable: bool,
        owner: Option<Ownership>,
    ) -> PodbootResult<PublishedEnvironment> {
        self.ensure_open()?;
        let published = self.to_published();
        let mode = publish_mode(world_readable);

        let json_path = dir.join(ENVIRONMENT_JSON);
        write_atomic(&json_path, &serde_json::to_vec_pretty(&published)?, mode)?;
        chown_path(&json_path, owner)?;

        let profile_path = dir.join(ENVIRONMENT_PROFILE);
        write_atomic(
            &profile_path,
            super::render_profile(&published).as_bytes(),
            mode,
        )?;
        chown_path(&profile_path, owner)?;

        self.sealed = true;
        tracing::info!(
            digest = %published.digest,
            vars = published.vars.len(),
            path_fragments = published.path.len(),
            "Published environment snapshot to {}",
            dir.display()
        );
        Ok(published)
    }

    /// Mark as published without writing (content already on disk).
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    fn ensure_open(&self) -> PodbootResult<()> {
        if self.sealed {
            return Err(PodbootError::InvalidState(
                "environment snapshot already published".into(),
            ));
        }
        Ok(())
    }
}

/// Read-only snapshot as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedEnvironment {
    pub version: u32,
    pub digest: String,
    pub published_at: DateTime<Utc>,
    pub vars: BTreeMap<String, String>,
    pub path: Vec<String>,
}

impl PublishedEnvironment {
    pub fn load(path: &Path) -> PodbootResult<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PodbootError::NotFound(format!("environment snapshot {}", path.display()))
            } else {
                PodbootError::Io(e)
            }
        })?;
        let published: PublishedEnvironment = serde_json::from_slice(&bytes)?;
        if published.version > SNAPSHOT_FORMAT_VERSION {
            return Err(PodbootError::Config(format!(
                "environment snapshot version {} is newer than supported {}",
                published.version, SNAPSHOT_FORMAT_VERSION
            )));
        }
        Ok(published)
    }

    pub fn load_from_dir(dir: &Path) -> PodbootResult<Self> {
        Self::load(&dir.join(ENVIRONMENT_JSON))
    }

    /// Variables for a child process, with PATH merged onto `base_path`.
    pub fn to_env(&self, base_path: &str) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = self
            .vars
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.push(("PATH".to_string(), merge_path(&self.path, base_path)));
        env
    }
}

fn publish_mode(world_readable: bool) -> u32 {
    if world_readable { 0o644 } else { 0o600 }
}

fn has_mode_and_owner(path: &Path, mode: u32, owner: Option<Ownership>) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    meta.is_file()
        && meta.mode() & 0o7777 == mode
        && owner.is_none_or(|o| meta.uid() == o.uid && meta.gid() == o.gid)
}

/// Prepend `fragments` to `base`, dropping duplicate and empty entries.
///
/// Applying the result again as `base` yields the same string.
pub fn merge_path(fragments: &[String], base: &str) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for entry in fragments
        .iter()
        .map(String::as_str)
        .chain(base.split(':'))
    {
        if !entry.is_empty() && !seen.contains(&entry) {
            seen.push(entry);
        }
    }
    seen.join(":")
}

fn validate_name(key: &str) -> PodbootResult<()> {
    let mut chars = key.chars();
    let valid = matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric());
    if valid {
        Ok(())
    } else {
        Err(PodbootError::Config(format!(
            "invalid environment variable name '{}'",
            key
        )))
    }
}
