use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{FormatError, Result};

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

/// Replace `path` with the bytes produced by `write`, never leaving a partial
/// file behind.
///
/// The content goes to a temporary file in the same directory, which is
/// flushed, synced and given the permissions of the file it replaces before
/// being renamed over `path`. If `write` fails the temporary file is removed
/// and `path` is untouched.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let dir = parent_dir(path);
    let mut tmp = tempfile::Builder::new()
        .prefix(".ti-")
        .suffix(".tmp")
        .tempfile_in(dir)?;

    write(tmp.as_file_mut())?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;

    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(tmp.path(), meta.permissions())?;
    }
    tmp.persist(path).map_err(|e| FormatError::Io(e.error))?;

    // make the rename itself durable where directories can be synced
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
    Ok(())
}

/// Write `bytes` to `path` atomically.
pub fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    write_atomic(path, |f| Ok(f.write_all(bytes)?))
}

/// Exclusive advisory lock on a sidecar `.<name>.lock` file next to the
/// target. Released when dropped.
///
/// The lock only excludes other processes that take the same lock; plain
/// writers are not blocked.
#[derive(Debug)]
pub struct EditLock {
    file: File,
    path: PathBuf,
}

impl EditLock {
    /// Block until the lock for `target` is held.
    pub fn acquire(target: &Path) -> Result<EditLock> {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = parent_dir(target).join(format!(".{}.lock", name));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        FileExt::lock_exclusive(&file)?;
        tracing::debug!("acquired edit lock {}", path.display());
        Ok(EditLock { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether another handle currently holds the lock.
    pub fn is_held(target: &Path) -> Result<bool> {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let path = parent_dir(target).join(format!(".{}.lock", name));
        let file = match File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        Ok(FileExt::try_lock_exclusive(&file).is_err())
    }
}

impl Drop for EditLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        tracing::debug!("released edit lock {}", self.path.display());
    }
}
