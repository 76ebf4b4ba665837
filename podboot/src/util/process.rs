//! Process helpers: signalling, PATH lookup and one-shot command execution.

use super::Ownership;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use podboot_shared::errors::{PodbootError, PodbootResult};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

/// Kill a process with SIGKILL.
///
/// # Returns
/// * `true` - Process was killed or doesn't exist
/// * `false` - Failed to kill (permission denied)
pub fn kill_process(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL).is_ok() || !is_process_alive(pid)
}

/// Ask a process to terminate with SIGTERM.
pub fn terminate_process(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
}

/// Check if a process with the given PID exists.
///
/// Sends the null signal, which performs the permission and existence
/// checks without delivering anything.
pub fn is_process_alive(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid as i32), None).is_ok()
}

/// Human-readable exit description: `exit 3` or `signal 9`.
pub fn describe_exit(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit {}", code),
        (None, Some(sig)) => format!("signal {}", sig),
        _ => "unknown exit".to_string(),
    }
}

/// Resolve `binary` against a colon-separated search path.
///
/// Names containing a slash are checked directly.
pub fn find_on_path(binary: &str, search_path: &str) -> Option<PathBuf> {
    if binary.contains('/') {
        let candidate = PathBuf::from(binary);
        return is_executable(&candidate).then_some(candidate);
    }

    search_path
        .split(':')
        .filter(|dir| !dir.is_empty())
        .map(|dir| Path::new(dir).join(binary))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Run `argv` to completion with an explicit environment.
///
/// The child does not inherit the parent's environment beyond what is
/// passed in `env`, and runs as `owner` when one is given. Output is
/// captured; the tail of stderr is included in the error on failure.
pub async fn run_command(
    argv: &[String],
    env: &[(String, String)],
    owner: Option<Ownership>,
) -> PodbootResult<()> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| PodbootError::Config("empty command".into()))?;

    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .env_clear()
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(owner) = owner {
        cmd.uid(owner.uid).gid(owner.gid);
    }

    let output = cmd
        .output()
        .await
        .map_err(|e| PodbootError::Io(std::io::Error::new(e.kind(), format!("{}: {}", program, e))))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let tail: String = stderr
        .lines()
        .rev()
        .take(3)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join(" | ");
    Err(PodbootError::Internal(format!(
        "`{}` {}{}",
        argv.join(" "),
        describe_exit(output.status),
        if tail.is_empty() {
            String::new()
        } else {
            format!(": {}", tail)
        }
    )))
}
