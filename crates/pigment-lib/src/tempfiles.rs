//! Temporary file management for the external-memory pipeline.
//!
//! A [`TempFileManager`] is an explicit handle created once per process
//! from the configured temp directory and passed through the construction
//! and query entry points. Every intermediate file of the pipeline is
//! allocated through it, tracked in a shared registry, and unlinked when the
//! manager is dropped.
//!
//! [`install_signal_handlers`] registers SIGINT and SIGABRT once against the
//! registry so that an interrupted run still removes its temporary files.
//! The handler thread holds only a weak reference: once the manager is gone
//! the signals fall through to a plain exit.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use signal_hook::consts::{SIGABRT, SIGINT};
use signal_hook::iterator::Signals;
use tracing::debug;

use crate::error::Result;

type Registry = Arc<Mutex<BTreeSet<PathBuf>>>;

/// Allocates and tracks temporary files under one directory
pub struct TempFileManager {
    dir: PathBuf,
    /// Run identifier (timestamp-based) so concurrent runs sharing a temp
    /// directory do not collide
    run_id: u64,
    counter: AtomicU64,
    registry: Registry,
}

impl TempFileManager {
    /// Creates a manager rooted at `dir`, creating the directory if needed
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let run_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock is after the epoch")
            .as_nanos() as u64;

        Ok(Self {
            dir,
            run_id,
            counter: AtomicU64::new(0),
            registry: Arc::new(Mutex::new(BTreeSet::new())),
        })
    }

    /// The directory temporary files are created in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reserves a fresh uniquely-named path and registers it for cleanup.
    /// The file itself is created by the caller.
    pub fn create_path(&self, prefix: &str, ext: &str) -> PathBuf {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        let path = self
            .dir
            .join(format!("pigment.tmp.run_{}.{}.{}{}", self.run_id, prefix, id, ext));
        self.registry.lock().unwrap().insert(path.clone());
        path
    }

    /// Unlinks one temporary file early and drops it from the registry.
    /// Missing files are ignored; the pipeline deletes each stage's input
    /// as soon as the next stage has consumed it.
    pub fn remove(&self, path: &Path) {
        self.registry.lock().unwrap().remove(path);
        let _ = fs::remove_file(path);
    }

    /// Unlinks every registered temporary file
    pub fn delete_all(&self) {
        let mut registry = self.registry.lock().unwrap();
        for path in registry.iter() {
            debug!("Removing temporary file {:?}", path);
            let _ = fs::remove_file(path);
        }
        registry.clear();
    }
}

impl Drop for TempFileManager {
    fn drop(&mut self) {
        self.delete_all();
    }
}

/// Installs SIGINT/SIGABRT handlers that unlink the manager's temporary
/// files and exit with status 1. Call once per process.
pub fn install_signal_handlers(manager: &TempFileManager) -> Result<()> {
    let registry: Weak<Mutex<BTreeSet<PathBuf>>> = Arc::downgrade(&manager.registry);
    let mut signals = Signals::new([SIGINT, SIGABRT])?;

    std::thread::Builder::new()
        .name("pigment-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                eprintln!("caught signal {}", signal);
                eprintln!("cleaning up temporary files");
                if let Some(registry) = registry.upgrade() {
                    if let Ok(paths) = registry.lock() {
                        for path in paths.iter() {
                            let _ = fs::remove_file(path);
                        }
                    }
                }
                std::process::exit(1);
            }
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths_are_unique() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path()).unwrap();
        let a = manager.create_path("pairs-", ".bin");
        let b = manager.create_path("pairs-", ".bin");
        assert_ne!(a, b);
        assert!(a.starts_with(dir.path()));
    }

    #[test]
    fn test_drop_removes_files() {
        let dir = TempDir::new().unwrap();
        let path;
        {
            let manager = TempFileManager::new(dir.path()).unwrap();
            path = manager.create_path("stage-", ".bin");
            fs::write(&path, b"payload").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path()).unwrap();
        let path = manager.create_path("stage-", ".bin");
        fs::write(&path, b"payload").unwrap();
        manager.remove(&path);
        assert!(!path.exists());
        manager.remove(&path);
    }
}
