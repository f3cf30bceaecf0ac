//! File helpers shared by every on-disk artifact: owner-only permissions,
//! write-temp-then-rename replacement and per-path locks.

use std::collections::HashMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tempfile::NamedTempFile;

use crate::error::VaultError;

/// Create `dir` and its parents if missing.
pub fn ensure_dir(dir: &Path) -> Result<(), VaultError> {
    fs::create_dir_all(dir).map_err(|e| VaultError::storage(dir, e))
}

/// Create the parent directory of `path` if missing.
pub fn ensure_parent(path: &Path) -> Result<(), VaultError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

// ── Per-path locks ─────────────────────────────────────────────────

fn lock_registry() -> &'static Mutex<HashMap<PathBuf, Arc<Mutex<()>>>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    LOCKS.get_or_init(Mutex::default)
}

/// Key under which `path` is locked: the canonical parent directory joined
/// with the file name, or the absolute path while the parent does not
/// exist yet.
fn lock_key(path: &Path) -> PathBuf {
    let name = path.file_name().unwrap_or_default();
    fs::canonicalize(parent_dir(path)).map_or_else(
        |_| {
            std::env::current_dir()
                .map_or_else(|_| path.to_path_buf(), |cwd| cwd.join(path))
        },
        |dir| dir.join(name),
    )
}

/// Run `f` while holding the process-wide lock for `path`.
///
/// Every handle to the same file shares one lock, so load-mutate-save
/// sequences through different handles cannot interleave.
pub fn with_file_lock<T>(path: &Path, f: impl FnOnce() -> T) -> T {
    let lock = {
        let mut registry = lock_registry()
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(registry.entry(lock_key(path)).or_default())
    };
    let _held = lock.lock().unwrap_or_else(PoisonError::into_inner);
    f()
}

// ── Reads and writes ───────────────────────────────────────────────

/// Read a file, treating "not found" as `None`.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, VaultError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(VaultError::storage(path, e)),
    }
}

/// Replace `path` with `contents` so readers see either the old file or the
/// new one, never a partial write.
///
/// Each call writes its own uniquely named, owner-only temp file
/// (`.name.XXXXXX.tmp`) in the same directory, fsyncs it, renames it over
/// `path` and then fsyncs the directory. On failure the temp file is
/// removed and `path` is untouched.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), VaultError> {
    ensure_parent(path)?;
    let dir = parent_dir(path);
    let name = path
        .file_name()
        .map_or_else(|| "file".into(), |n| n.to_string_lossy().into_owned());

    let io = |e| VaultError::storage(path, e);
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(io)?;
    write_and_sync(&mut tmp, contents).map_err(io)?;
    tmp.persist(path).map_err(|e| io(e.error))?;
    sync_dir(dir).map_err(io)
}

fn write_and_sync(tmp: &mut NamedTempFile, contents: &[u8]) -> std::io::Result<()> {
    restrict(tmp.path())?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()
}

/// Flush the directory entry so a completed rename survives power loss.
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    fs::File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

/// Restrict `path` to owner read/write where the OS supports it.
pub fn restrict(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Delete `path`; returns whether a file was actually removed.
pub fn remove_if_exists(path: &Path) -> Result<bool, VaultError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(VaultError::storage(path, e)),
    }
}
