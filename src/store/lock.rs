//! Cross-process lock on a store file.
//!
//! Every write to a file-backed store reloads the document, changes it and
//! writes it back whole. Two processes doing that at the same time would each
//! allocate from their own copy and the last writer would drop the other's
//! instance. [`StoreLock`] serialises them with an OS-level exclusive lock on
//! `<store>.lock` next to the store file.
//!
//! Locking uses `try_lock_exclusive` in an async retry loop with exponential
//! backoff, and every blocking file call runs on `spawn_blocking`.

use anyhow::{Context, Result};
use fs4::fs_std::FileExt;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_retry::strategy::ExponentialBackoff;
use tracing::debug;

use crate::constants::{MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS, default_store_lock_timeout};

/// Exclusive lock on a store file, released on drop.
///
/// The lock file itself is left on disk: unlinking it would let a waiter that
/// already opened it lock an inode nobody else sees.
#[derive(Debug)]
pub struct StoreLock {
    _file: Arc<File>,
    lock_path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        debug!(lock = %self.lock_path.display(), "store lock released");
    }
}

impl StoreLock {
    /// `tree.json` → `tree.json.lock`
    pub fn lock_path(store_path: &Path) -> PathBuf {
        let mut name = store_path.file_name().map(OsString::from).unwrap_or_else(|| OsString::from("store"));
        name.push(".lock");
        store_path.with_file_name(name)
    }

    pub async fn acquire(store_path: &Path) -> Result<Self> {
        Self::acquire_with_timeout(store_path, default_store_lock_timeout()).await
    }

    pub async fn acquire_with_timeout(store_path: &Path, timeout: Duration) -> Result<Self> {
        let lock_path = Self::lock_path(store_path);
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
        }

        let open_path = lock_path.clone();
        let file = tokio::task::spawn_blocking(move || {
            OpenOptions::new().create(true).write(true).truncate(false).open(&open_path)
        })
        .await
        .context("spawn_blocking panicked")?
        .with_context(|| format!("Failed to open lock file: {}", lock_path.display()))?;
        let file = Arc::new(file);

        let start = Instant::now();
        let backoff = ExponentialBackoff::from_millis(STARTING_BACKOFF_DELAY_MS)
            .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS));

        for delay in backoff {
            let candidate = Arc::clone(&file);
            let locked = tokio::task::spawn_blocking(move || candidate.try_lock_exclusive())
                .await
                .context("spawn_blocking panicked")?;

            if let Ok(true) = locked {
                debug!(
                    lock = %lock_path.display(),
                    wait_ms = start.elapsed().as_millis(),
                    "store lock acquired"
                );
                return Ok(Self {
                    _file: file,
                    lock_path,
                });
            }

            let remaining = timeout.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(delay.min(remaining)).await;
        }

        Err(anyhow::anyhow!(
            "Timeout acquiring store lock '{}' after {timeout:?}; another process is writing to the store",
            lock_path.display()
        ))
    }
}
