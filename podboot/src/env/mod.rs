//! Environment propagation.
//!
//! Values produced during init are collected into an [`EnvironmentSnapshot`],
//! published once to the state directory and then consumed by every later
//! process:
//!
//! ```text
//! init steps ──set/prepend──▶ EnvironmentSnapshot ──publish──▶ environment.json
//!                                                          └──▶ environment.sh
//!
//! supervisor ──PublishedEnvironment::to_env()──▶ Command::envs (explicit)
//! ssh login  ──. /etc/profile.d/podboot.sh ───▶ environment.sh (idempotent)
//! ```

mod profile;
mod snapshot;

pub use profile::{render_profile, render_profile_hook};
pub use snapshot::{
    ENVIRONMENT_JSON, ENVIRONMENT_PROFILE, EnvironmentSnapshot, PublishedEnvironment,
    SNAPSHOT_FORMAT_VERSION, merge_path,
};
