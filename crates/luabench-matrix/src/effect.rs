//! The side-effect target as an explicit shared resource.
//!
//! Every exploit declares the file it tries to write. Entries that resolve
//! to the same absolute path are serialized through [`EffectLocks`], and
//! [`EffectGuard`] removes the file before launch and on every exit path.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use luabench_core::obs::emit_cleanup_error;
use luabench_core::SideEffect;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::RunnerError;

/// One async mutex per side-effect path.
#[derive(Default)]
pub struct EffectLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl EffectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `path`.
    pub async fn acquire(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of distinct paths seen so far.
    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

async fn remove_if_present(path: &Path) -> io::Result<()> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn remove_now(path: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Owns a side-effect path for the duration of one run.
#[derive(Debug)]
pub struct EffectGuard {
    path: PathBuf,
    armed: bool,
}

impl EffectGuard {
    /// Clear leftovers from a leaked run and take ownership of `path`.
    pub async fn prepare(path: PathBuf) -> Result<Self, RunnerError> {
        remove_if_present(&path)
            .await
            .map_err(|source| RunnerError::StaleEvidence {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, armed: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the exploit left its marker in the target file.
    pub async fn observe(&self, effect: &SideEffect) -> bool {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => effect.matches(&String::from_utf8_lossy(&bytes)),
            Err(_) => false,
        }
    }

    /// Remove the target now; the guard is disarmed only on success.
    pub async fn cleanup(&mut self) -> Result<(), RunnerError> {
        remove_if_present(&self.path)
            .await
            .map_err(|source| RunnerError::Cleanup {
                path: self.path.clone(),
                source,
            })?;
        self.armed = false;
        Ok(())
    }
}

// Drop cannot await; the blocking removal only runs when a run bailed out
// before `cleanup`.
impl Drop for EffectGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = remove_now(&self.path) {
                emit_cleanup_error(&self.path, &e);
            }
        }
    }
}
