//! Locked, atomic file writes
//!
//! Host files are shared by every keyrack invocation on the machine. Writers
//! hold an exclusive lock on a sibling `.lock` file across read-modify-write,
//! and replace the target by rename so readers never see a torn file.

use anyhow::Result;
use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::KeyrackError;

/// Exclusive advisory lock, released on drop
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the lock at `path` is held
    pub fn exclusive(path: &Path) -> Result<Self> {
        ensure_private_dir(path)?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| KeyrackError::io(path, e))?;
        flock(&file, libc::LOCK_EX)
            .map_err(|e| KeyrackError::io(path, format!("cannot acquire lock: {}", e)))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = flock(&self.file, libc::LOCK_UN) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to release lock");
        }
    }
}

fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    loop {
        // SAFETY: the descriptor is owned by `file` and stays open for the call
        let result = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if result == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Replace `path` with `bytes` via temp file + rename, mode 0600
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = ensure_private_dir(path)?;
    replace(&dir, path, bytes, 0o600)
}

/// Same as `write_atomic` for files meant to be committed: mode 0644, and
/// missing parents are created with default permissions
pub fn write_atomic_shared(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = parent_dir(path);
    fs::create_dir_all(&dir).map_err(|e| KeyrackError::io(&dir, e))?;
    replace(&dir, path, bytes, 0o644)
}

fn replace(dir: &Path, path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| KeyrackError::io(dir, e))?;
    tmp.as_file()
        .set_permissions(Permissions::from_mode(mode))
        .map_err(|e| KeyrackError::io(tmp.path(), e))?;
    tmp.write_all(bytes).map_err(|e| KeyrackError::io(tmp.path(), e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| KeyrackError::io(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| KeyrackError::io(path, format!("cannot replace file: {}", e.error)))?;

    Ok(())
}

/// Read a file, `None` if it does not exist
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(KeyrackError::io(path, e).into()),
    }
}

/// Category of a JSON error without its message
///
/// serde messages can quote fragments of the input, which for keyrack files
/// may be secret material.
pub fn json_error_kind(e: &serde_json::Error) -> &'static str {
    match e.classify() {
        serde_json::error::Category::Io => "io error",
        serde_json::error::Category::Syntax => "syntax error",
        serde_json::error::Category::Data => "unexpected shape",
        serde_json::error::Category::Eof => "truncated",
    }
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Create the parent directory of `path` (mode 0700 when newly created)
fn ensure_private_dir(path: &Path) -> Result<PathBuf> {
    let dir = parent_dir(path);

    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| KeyrackError::io(&dir, e))?;
        fs::set_permissions(&dir, Permissions::from_mode(0o700))
            .map_err(|e| KeyrackError::io(&dir, e))?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_private_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("f.json");

        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"two");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_write_atomic_shared_is_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".agent").join("keyrack.yml");

        write_atomic_shared(&path, b"org: o\n").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"org: o\n");
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_read_optional() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        assert!(read_optional(&path).unwrap().is_none());
        fs::write(&path, b"x").unwrap();
        assert_eq!(read_optional(&path).unwrap().unwrap(), b"x");
    }

    #[test]
    fn test_lock_is_reacquirable_after_drop() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.lock");
        {
            let _lock = FileLock::exclusive(&path).unwrap();
        }
        let _again = FileLock::exclusive(&path).unwrap();
    }
}
