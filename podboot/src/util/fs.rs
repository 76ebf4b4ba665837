//! Filesystem helpers shared by init steps.

use podboot_shared::errors::{PodbootError, PodbootResult};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Numeric owner for files created on behalf of the execution account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub uid: u32,
    pub gid: u32,
}

/// Write `contents` to `path` via a temp file in the same directory and a rename.
///
/// Readers never observe a partially written file. Parent directories are
/// created if missing.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> PodbootResult<()> {
    let parent = path
        .parent()
        .ok_or_else(|| PodbootError::Internal(format!("no parent for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.as_file()
        .set_permissions(std::fs::Permissions::from_mode(mode))?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| PodbootError::Io(e.error))?;

    Ok(())
}

/// Change ownership of `path` when an owner is configured.
pub fn chown_path(path: &Path, owner: Option<Ownership>) -> PodbootResult<()> {
    let Some(owner) = owner else {
        return Ok(());
    };

    nix::unistd::chown(
        path,
        Some(nix::unistd::Uid::from_raw(owner.uid)),
        Some(nix::unistd::Gid::from_raw(owner.gid)),
    )
    .map_err(|e| {
        PodbootError::Io(std::io::Error::other(format!(
            "chown {}:{} {}: {}",
            owner.uid,
            owner.gid,
            path.display(),
            e
        )))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents_and_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/file.txt");

        write_atomic(&path, b"hello", 0o600).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("file.txt");

        write_atomic(&path, b"one", 0o644).unwrap();
        write_atomic(&path, b"two", 0o644).unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "two");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_chown_without_owner_is_noop() {
        chown_path(Path::new("/definitely/not/here"), None).unwrap();
    }
}
