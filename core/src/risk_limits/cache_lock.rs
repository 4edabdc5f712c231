//! Cross-process and in-process locking for the risk-limit and
//! instrument-info caches.
//!
//! Two layers, matching the reference implementation:
//! - a ref-counted in-process mutex registry keyed by cache path, so threads
//!   within one process serialize on the same lock object rather than racing
//!   to open the file lock;
//! - an OS-level advisory file lock (`flock`) on a sibling `.lock` file,
//!   opened refusing to follow symlinks, with a post-open inode/device check
//!   against a fresh `lstat` to close the symlink-swap TOCTOU window.

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::error::RiskLimitError;

/// Byte range locked on platforms that only support range locks. `flock`
/// locks the whole file regardless, but the file is padded to this length
/// for parity with the reference implementation's Windows path.
const LOCK_REGION_BYTES: u64 = 1024;

type LockRegistry = Mutex<HashMap<String, (Arc<Mutex<()>>, usize)>>;

fn in_process_locks() -> &'static LockRegistry {
    static REGISTRY: OnceLock<LockRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// A ref-counted handle on the in-process lock for one cache path. Dropping
/// it releases the reference; the entry is removed once the count hits zero.
pub struct InProcessLockGuard {
    key: String,
    lock: Arc<Mutex<()>>,
}

impl InProcessLockGuard {
    pub fn acquire(path: &Path) -> Self {
        let key = path.to_string_lossy().to_string();
        let mut registry = in_process_locks().lock();
        let entry = registry
            .entry(key.clone())
            .or_insert_with(|| (Arc::new(Mutex::new(())), 0));
        entry.1 += 1;
        let lock = entry.0.clone();
        Self { key, lock }
    }

    /// Lock the path's mutex for the duration of the closure.
    pub fn with_lock<T>(&self, f: impl FnOnce() -> T) -> T {
        let _guard = self.lock.lock();
        f()
    }
}

impl Drop for InProcessLockGuard {
    fn drop(&mut self) {
        let mut registry = in_process_locks().lock();
        if let Some(entry) = registry.get_mut(&self.key) {
            if entry.1 <= 1 {
                registry.remove(&self.key);
            } else {
                entry.1 -= 1;
            }
        }
    }
}

/// Open a cache's sibling `.lock` file, rejecting symlinks.
pub fn open_lock_file(lock_path: &Path) -> Result<File, RiskLimitError> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .custom_flags(libc::O_NOFOLLOW)
        .mode(0o600)
        .open(lock_path)
        .map_err(|e| RiskLimitError::CacheIo(format!("open lock file {}: {e}", lock_path.display())))?;

    let path_meta = std::fs::symlink_metadata(lock_path)
        .map_err(|e| RiskLimitError::CacheIo(format!("lstat lock file {}: {e}", lock_path.display())))?;
    if path_meta.file_type().is_symlink() {
        return Err(RiskLimitError::SymlinkDetected(lock_path.display().to_string()));
    }
    let fd_meta = file
        .metadata()
        .map_err(|e| RiskLimitError::CacheIo(format!("fstat lock file {}: {e}", lock_path.display())))?;
    if (path_meta.dev(), path_meta.ino()) != (fd_meta.dev(), fd_meta.ino()) {
        return Err(RiskLimitError::SymlinkDetected(format!(
            "{} changed identity during open",
            lock_path.display()
        )));
    }

    if file.metadata().map(|m| m.len()).unwrap_or(0) < LOCK_REGION_BYTES {
        file.set_len(LOCK_REGION_BYTES).ok();
    }

    Ok(file)
}

/// Acquire an exclusive advisory lock on `lock_file` for the duration of the
/// returned guard.
pub fn acquire_file_lock(lock_file: &File) -> Result<FileLockGuard<'_>, RiskLimitError> {
    let rc = unsafe { libc::flock(lock_file.as_raw_fd(), libc::LOCK_EX) };
    if rc != 0 {
        return Err(RiskLimitError::CacheIo(format!(
            "flock failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(FileLockGuard { file: lock_file })
}

pub struct FileLockGuard<'a> {
    file: &'a File,
}

impl Drop for FileLockGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

pub fn lock_file_path_for(cache_path: &Path) -> PathBuf {
    let mut lock_path = cache_path.to_path_buf();
    let file_name = lock_path
        .file_name()
        .map(|n| format!("{}.lock", n.to_string_lossy()))
        .unwrap_or_else(|| "cache.lock".to_string());
    lock_path.set_file_name(file_name);
    lock_path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_process_lock_is_shared_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk_limits.json");

        let a = InProcessLockGuard::acquire(&path);
        let b = InProcessLockGuard::acquire(&path);
        assert_eq!(a.key, b.key);
        drop(a);
        drop(b);
    }

    #[test]
    fn open_lock_file_rejects_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.lock");
        std::fs::write(&real, b"").unwrap();
        let link = dir.path().join("link.lock");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let result = open_lock_file(&link);
        assert!(result.is_err());
    }

    #[test]
    fn distinct_caches_get_distinct_lock_paths() {
        let risk = Path::new("/tmp/risk_limits_cache.json");
        let instruments = Path::new("/tmp/instruments_cache.json");
        assert_ne!(lock_file_path_for(risk), lock_file_path_for(instruments));
    }
}
