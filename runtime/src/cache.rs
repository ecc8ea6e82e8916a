//! Local, per-(user, course) persistence of the completion set and the last
//! known progress percentage. A disposable projection of backend state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use coursegate_core::LearnerCourse;
use coursegate_core::completion::CompletionSet;

use crate::util::{remove_if_exists, write_private};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedProgress {
    pub completed: CompletionSet,
    pub last_percentage: u8,
    pub updated_at: DateTime<Utc>,
}

impl CachedProgress {
    pub fn new(completed: CompletionSet, last_percentage: u8) -> Self {
        Self {
            completed,
            last_percentage,
            updated_at: Utc::now(),
        }
    }

    pub fn scope(&self) -> &LearnerCourse {
        self.completed.scope()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache entry could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Synchronous store keyed by `LearnerCourse`. The key is taken from the
/// record itself on save, so a set can only be written under its own scope.
pub trait LocalCache: Send + Sync {
    /// `None` when nothing is cached or the entry belongs to another scope.
    fn load(&self, scope: &LearnerCourse) -> Option<CachedProgress>;

    fn save(&self, progress: &CachedProgress) -> Result<(), CacheError>;

    fn clear(&self, scope: &LearnerCourse) -> Result<(), CacheError>;
}

#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<LearnerCourse, CachedProgress>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalCache for MemoryCache {
    fn load(&self, scope: &LearnerCourse) -> Option<CachedProgress> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(scope).cloned()
    }

    fn save(&self, progress: &CachedProgress) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(progress.scope().clone(), progress.clone());
        Ok(())
    }

    fn clear(&self, scope: &LearnerCourse) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(scope);
        Ok(())
    }
}

/// One JSON file per scope under `dir`, named by a SHA-256 of the scope.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, scope: &LearnerCourse) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(scope.user_id.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(scope.course_id.as_str().as_bytes());
        self.dir
            .join("progress")
            .join(format!("{}.json", hex::encode(hasher.finalize())))
    }
}

impl LocalCache for FileCache {
    fn load(&self, scope: &LearnerCourse) -> Option<CachedProgress> {
        let path = self.path_for(scope);
        let data = std::fs::read_to_string(&path).ok()?;
        let progress: CachedProgress = match serde_json::from_str(&data) {
            Ok(progress) => progress,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable progress cache");
                return None;
            }
        };
        if progress.scope() != scope {
            tracing::warn!(%scope, cached = %progress.scope(), "ignoring progress cache written for another scope");
            return None;
        }
        Some(progress)
    }

    fn save(&self, progress: &CachedProgress) -> Result<(), CacheError> {
        let data = serde_json::to_vec_pretty(progress)?;
        write_private(&self.path_for(progress.scope()), &data)?;
        Ok(())
    }

    fn clear(&self, scope: &LearnerCourse) -> Result<(), CacheError> {
        remove_if_exists(&self.path_for(scope))?;
        Ok(())
    }
}
