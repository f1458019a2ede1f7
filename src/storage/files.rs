//! File commit helpers
//!
//! A store becomes visible through renames: every file is written under a
//! `.tmp` name, fsynced, then renamed into place, and the metadata marker
//! is renamed last. `TempFiles` removes whatever was left behind when a
//! build fails part-way. `FileLock` serializes writers of files that are
//! appended to in place.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use super::errors::{StoreError, StoreResult};

/// `<path>.tmp`
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// `<base><suffix>`, e.g. `docs` + `.meta`
pub fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Creates the parent directory of `path` if missing
pub fn ensure_parent(path: &Path) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                StoreError::io_error(
                    format!("Failed to create directory: {}", parent.display()),
                    e,
                )
            })?;
        }
    }
    Ok(())
}

/// fsyncs a finished file
pub fn sync_file(file: &File, path: &Path) -> StoreResult<()> {
    file.sync_all()
        .map_err(|e| StoreError::io_error(format!("Failed to fsync {}", path.display()), e))
}

/// fsyncs the directory containing `path` so a rename is durable
pub fn sync_parent_dir(path: &Path) -> StoreResult<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let dir = OpenOptions::new().read(true).open(parent).map_err(|e| {
        StoreError::io_error(
            format!("Failed to open directory for fsync: {}", parent.display()),
            e,
        )
    })?;
    dir.sync_all().map_err(|e| {
        StoreError::io_error(format!("Failed to fsync directory: {}", parent.display()), e)
    })
}

/// Renames `from` to `to`, fsyncing the directory when `fsync` is set
pub fn commit_rename(from: &Path, to: &Path, fsync: bool) -> StoreResult<()> {
    fs::rename(from, to).map_err(|e| {
        StoreError::io_error(
            format!("Failed to rename {} to {}", from.display(), to.display()),
            e,
        )
    })?;
    if fsync {
        sync_parent_dir(to)?;
    }
    Ok(())
}

/// Removes a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io_error(
            format!("Failed to remove {}", path.display()),
            e,
        )),
    }
}

/// Temporary files owned by an in-progress build
///
/// Dropping the guard deletes every tracked file that still exists;
/// `disarm` is called once all of them have been renamed into place.
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Vec<PathBuf>,
}

impl TempFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `path` and returns it
    pub fn track(&mut self, path: PathBuf) -> PathBuf {
        self.paths.push(path.clone());
        path
    }

    /// Stops tracking; nothing is removed on drop
    pub fn disarm(&mut self) {
        self.paths.clear();
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        for path in &self.paths {
            let _ = fs::remove_file(path);
        }
    }
}

/// Exclusive advisory lock on an open file, released on drop
///
/// Holds its own handle to the same open file, so the locked file stays
/// usable through the original handle while the guard lives.
#[derive(Debug)]
pub struct FileLock {
    file: File,
}

impl FileLock {
    /// Blocks until the lock on `file` is acquired
    pub fn exclusive(file: &File, path: &Path) -> StoreResult<Self> {
        let lock_err =
            |e: io::Error| StoreError::io_error(format!("Failed to lock {}", path.display()), e);
        let file = file.try_clone().map_err(lock_err)?;
        lock_exclusive(&file).map_err(lock_err)?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = unlock(&self.file);
    }
}

#[cfg(unix)]
fn flock(file: &File, operation: libc::c_int) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    loop {
        let ret = unsafe { libc::flock(file.as_raw_fd(), operation) };
        if ret == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_EX)
}

#[cfg(unix)]
fn unlock(file: &File) -> io::Result<()> {
    flock(file, libc::LOCK_UN)
}

// Single-writer platforms: appends are not coordinated across processes
#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn unlock(_file: &File) -> io::Result<()> {
    Ok(())
}
