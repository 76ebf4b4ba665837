//! podboot: staged container bootstrap.
//!
//! Runs ordered, idempotent init steps (credentials, directories, package
//! installs, SSH access), publishes the resulting environment snapshot, then
//! supervises long-running services until the container stops.

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod env;
pub mod init;
pub mod logging;
pub mod mcp;
pub mod pipeline;
pub mod state;
pub mod supervisor;
pub mod util;

pub use bootstrap::{BootOutcome, Bootstrap, exit_code_for_error, shutdown_signal};
pub use config::BootConfig;
pub use env::{EnvironmentSnapshot, PublishedEnvironment};
pub use podboot_shared::errors::{PodbootError, PodbootResult};
pub use state::{BootStatus, StatusReport};
