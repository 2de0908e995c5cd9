//! Crash-resumable crawl progress, one JSON document per scope.
//!
//! Every mutation runs load-modify-save under the scope's lock, so concurrent
//! persistence workers never lose each other's updates. Saves replace the
//! file atomically (temp file in the same directory, then rename). A failed
//! save is logged, the state stays dirty in memory and the next mutation or
//! [`CheckpointStore::flush`] writes it again. Losing progress only causes
//! reprocessing, which the catalog tolerates.

mod state;

pub use state::{CheckpointCounters, CheckpointState, ListingCursor};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Errors from checkpoint persistence. Never fatal to a run.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Filesystem failure.
    #[error("checkpoint I/O error at {path}: {source}")]
    Io {
        /// File or directory involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// State could not be encoded.
    #[error("checkpoint serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CheckpointError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Default)]
struct ScopeSlot {
    state: Option<CheckpointState>,
    dirty: bool,
}

/// Per-scope checkpoint documents under one directory.
#[derive(Debug)]
pub struct CheckpointStore {
    dir: PathBuf,
    // Arc lets callers drop the DashMap shard guard before awaiting the slot lock.
    scopes: DashMap<String, Arc<Mutex<ScopeSlot>>>,
}

impl CheckpointStore {
    /// Creates a store rooted at `dir`. The directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            scopes: DashMap::new(),
        }
    }

    /// Directory holding the checkpoint files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a scope's checkpoint file.
    #[must_use]
    pub fn path_for(&self, scope: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(scope)))
    }

    fn slot(&self, scope: &str) -> Arc<Mutex<ScopeSlot>> {
        self.scopes
            .entry(scope.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ScopeSlot::default())))
            .clone()
    }

    /// Returns the scope's state; an empty state if none exists or the file is unreadable.
    #[instrument(skip(self))]
    pub async fn load(&self, scope: &str) -> CheckpointState {
        let slot = self.slot(scope);
        let mut guard = slot.lock().await;
        self.ensure_loaded(scope, &mut guard).await.clone()
    }

    /// Replaces the scope's state and writes it.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the write fails. The state is kept in
    /// memory and written again at the next flush.
    #[instrument(skip(self, state), fields(pending = state.pending_urls.len(), completed = state.completed_urls.len()))]
    pub async fn save(&self, scope: &str, state: CheckpointState) -> Result<(), CheckpointError> {
        let slot = self.slot(scope);
        let mut guard = slot.lock().await;
        guard.state = Some(state);
        guard.dirty = true;
        self.write_slot(scope, &mut guard).await
    }

    /// Applies `mutate` to the scope's state under its lock, then saves.
    ///
    /// Save failures are logged, not returned.
    pub async fn update<R>(&self, scope: &str, mutate: impl FnOnce(&mut CheckpointState) -> R) -> R {
        let slot = self.slot(scope);
        let mut guard = slot.lock().await;
        let state = self.ensure_loaded(scope, &mut guard).await;
        let result = mutate(state);
        state.last_update = Some(Utc::now());
        guard.dirty = true;

        if let Err(error) = self.write_slot(scope, &mut guard).await {
            warn!(scope, error = %error, "checkpoint save failed; will retry at next flush");
        }
        result
    }

    /// Marks a URL committed.
    pub async fn mark_completed(&self, scope: &str, url: &str) {
        self.update(scope, |state| state.complete(url)).await;
    }

    /// Marks a URL discovered but not yet committed.
    pub async fn mark_pending(&self, scope: &str, url: &str) {
        self.update(scope, |state| {
            state.add_pending(url);
        })
        .await;
    }

    /// Marks a URL failed; it stays pending for the next run.
    pub async fn mark_failed(&self, scope: &str, url: &str, reason: &str) {
        self.update(scope, |state| state.record_failure(url, reason))
            .await;
    }

    /// Writes the scope's state if it has unsaved changes.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the write fails.
    #[instrument(skip(self))]
    pub async fn flush(&self, scope: &str) -> Result<(), CheckpointError> {
        let slot = self.slot(scope);
        let mut guard = slot.lock().await;
        if !guard.dirty {
            return Ok(());
        }
        self.write_slot(scope, &mut guard).await
    }

    /// Forgets all progress for a scope and deletes its file.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if an existing file cannot be removed.
    #[instrument(skip(self))]
    pub async fn clear(&self, scope: &str) -> Result<(), CheckpointError> {
        let slot = self.slot(scope);
        let mut guard = slot.lock().await;
        guard.state = Some(CheckpointState::new(scope));
        guard.dirty = false;

        let path = self.path_for(scope);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(scope, path = %path.display(), "checkpoint cleared");
                Ok(())
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(CheckpointError::io(&path, error)),
        }
    }

    async fn ensure_loaded<'a>(&self, scope: &str, slot: &'a mut ScopeSlot) -> &'a mut CheckpointState {
        if slot.state.is_none() {
            slot.state = Some(self.read_from_disk(scope).await);
        }
        slot.state.get_or_insert_with(|| CheckpointState::new(scope))
    }

    async fn read_from_disk(&self, scope: &str) -> CheckpointState {
        let path = self.path_for(scope);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(scope, "no checkpoint yet");
                return CheckpointState::new(scope);
            }
            Err(error) => {
                warn!(scope, path = %path.display(), error = %error, "checkpoint unreadable; starting empty");
                return CheckpointState::new(scope);
            }
        };

        match serde_json::from_slice::<CheckpointState>(&bytes) {
            Ok(mut state) => {
                state.scope = scope.to_string();
                debug!(
                    scope,
                    pending = state.pending_urls.len(),
                    completed = state.completed_urls.len(),
                    "checkpoint loaded"
                );
                state
            }
            Err(error) => {
                warn!(scope, path = %path.display(), error = %error, "checkpoint corrupt; starting empty");
                CheckpointState::new(scope)
            }
        }
    }

    async fn write_slot(&self, scope: &str, slot: &mut ScopeSlot) -> Result<(), CheckpointError> {
        let Some(state) = slot.state.as_ref() else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(state)?;
        self.write_atomic(scope, &bytes).await?;
        slot.dirty = false;
        Ok(())
    }

    async fn write_atomic(&self, scope: &str, bytes: &[u8]) -> Result<(), CheckpointError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| CheckpointError::io(&self.dir, e))?;

        let path = self.path_for(scope);
        let tmp = self.dir.join(format!(".{}.json.tmp", file_stem(scope)));

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        file.write_all(bytes)
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| CheckpointError::io(&tmp, e))?;
        drop(file);

        if let Err(error) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(CheckpointError::io(&path, error));
        }
        Ok(())
    }
}

/// Scope names become file names; anything outside `[A-Za-z0-9_-]` is replaced.
fn file_stem(scope: &str) -> String {
    let stem: String = scope
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() { "default".to_string() } else { stem }
}
