//! Atomic file replacement.
//!
//! [`atomic_write`] writes to a hidden temp file in the target's directory,
//! fsyncs it, copies permission bits, then renames it over the target. The
//! rename is the only mutation of the target path; on any earlier failure the
//! temp file is removed and the original is left untouched.

use std::fs::{self, File, Permissions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Replace `path` with `bytes` atomically.
///
/// `permissions` is applied to the temp file before the rename. Pass `None`
/// to keep the original file's permissions when it exists.
pub fn atomic_write(path: &Path, bytes: &[u8], permissions: Option<Permissions>) -> io::Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
        .to_string_lossy();

    let permissions = match permissions {
        Some(p) => Some(p),
        None => fs::metadata(path).ok().map(|m| m.permissions()),
    };

    let tmp_path = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));
    let mut guard = TempGuard::new(tmp_path);

    {
        let mut file = File::create(guard.path())?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    if let Some(perms) = permissions {
        fs::set_permissions(guard.path(), perms)?;
    }

    fs::rename(guard.path(), path)?;
    guard.disarm();
    Ok(())
}

/// Removes the temp file on drop unless disarmed after a successful rename.
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl TempGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to remove temp file");
                }
            }
        }
    }
}
