//! Checkpoint state and stores
//!
//! The coordinator is the only writer. Results are stored as JSON values so
//! one store serves every phase and the sweep driver.

use crate::error::{SimResult, SimulationError};
use crate::types::{RunClass, Stage};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifies which run a checkpoint belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointKey {
    pub run_class: RunClass,
    pub stage: Stage,
    /// Parameter fingerprint; runs with different parameters never share progress
    pub fingerprint: String,
}

impl CheckpointKey {
    pub fn new(run_class: RunClass, stage: Stage, fingerprint: impl Into<String>) -> Self {
        Self {
            run_class,
            stage,
            fingerprint: fingerprint.into(),
        }
    }

    fn file_prefix(&self) -> String {
        format!("checkpoint_{}_{}_{}_", self.run_class, self.stage, self.fingerprint)
    }
}

/// Persisted scheduler progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState<R> {
    pub run_id: Uuid,
    pub key: CheckpointKey,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub total_units: usize,
    pub completed_units: BTreeSet<String>,
    /// Results of completed units, keyed by unit id
    pub results: BTreeMap<String, R>,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub completed: bool,
}

/// Type-erased checkpoint as held by a [`CheckpointStore`]
pub type StoredCheckpoint = CheckpointState<serde_json::Value>;

impl<R> CheckpointState<R> {
    pub fn new(key: CheckpointKey, total_units: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            key,
            created_at: now,
            updated_at: now,
            total_units,
            completed_units: BTreeSet::new(),
            results: BTreeMap::new(),
            succeeded: 0,
            failed: 0,
            skipped: 0,
            completed: false,
        }
    }

    pub fn processed(&self) -> usize {
        self.completed_units.len()
    }

    pub fn is_done(&self, unit_id: &str) -> bool {
        self.completed_units.contains(unit_id)
    }
}

impl<R: Serialize> CheckpointState<R> {
    pub fn to_stored(&self) -> SimResult<StoredCheckpoint> {
        let results = self
            .results
            .iter()
            .map(|(id, r)| Ok((id.clone(), serde_json::to_value(r)?)))
            .collect::<SimResult<BTreeMap<_, _>>>()?;
        Ok(CheckpointState {
            run_id: self.run_id,
            key: self.key.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            total_units: self.total_units,
            completed_units: self.completed_units.clone(),
            results,
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            completed: self.completed,
        })
    }
}

impl StoredCheckpoint {
    pub fn decode<R: DeserializeOwned>(self) -> SimResult<CheckpointState<R>> {
        let results = self
            .results
            .into_iter()
            .map(|(id, v)| {
                serde_json::from_value(v)
                    .map(|r| (id.clone(), r))
                    .map_err(|e| SimulationError::Checkpoint(format!("result {}: {}", id, e)))
            })
            .collect::<SimResult<BTreeMap<_, _>>>()?;
        Ok(CheckpointState {
            run_id: self.run_id,
            key: self.key,
            created_at: self.created_at,
            updated_at: self.updated_at,
            total_units: self.total_units,
            completed_units: self.completed_units,
            results,
            succeeded: self.succeeded,
            failed: self.failed,
            skipped: self.skipped,
            completed: self.completed,
        })
    }
}

/// Persistence for scheduler checkpoints
pub trait CheckpointStore: Send + Sync {
    /// Newest checkpoint for `key` with the given completion flag
    fn latest(&self, key: &CheckpointKey, completed: bool) -> SimResult<Option<StoredCheckpoint>>;

    /// Insert or overwrite the checkpoint with this run id
    fn save(&self, checkpoint: &StoredCheckpoint) -> SimResult<()>;

    /// Delete every checkpoint for `key` except `keep`; returns how many went
    fn prune(&self, key: &CheckpointKey, keep: Uuid) -> SimResult<usize>;

    fn latest_incomplete(&self, key: &CheckpointKey) -> SimResult<Option<StoredCheckpoint>> {
        self.latest(key, false)
    }

    fn latest_completed(&self, key: &CheckpointKey) -> SimResult<Option<StoredCheckpoint>> {
        self.latest(key, true)
    }

    /// Mark complete, save, and drop everything older for the same key
    fn finalize(&self, checkpoint: &mut StoredCheckpoint) -> SimResult<()> {
        checkpoint.completed = true;
        checkpoint.updated_at = Utc::now();
        self.save(checkpoint)?;
        let removed = self.prune(&checkpoint.key, checkpoint.run_id)?;
        if removed > 0 {
            debug!("Pruned {} superseded checkpoints", removed);
        }
        Ok(())
    }
}

/// JSON files in a directory, one per run
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> SimResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| SimulationError::DirectoryCreate(format!("{}: {}", dir.display(), e)))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(checkpoint: &StoredCheckpoint) -> String {
        format!(
            "{}{}_{}.json",
            checkpoint.key.file_prefix(),
            checkpoint.created_at.format("%Y%m%d_%H%M%S"),
            checkpoint.run_id.simple()
        )
    }

    fn files_for(&self, key: &CheckpointKey) -> SimResult<Vec<PathBuf>> {
        let prefix = key.file_prefix();
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| SimulationError::Checkpoint(format!("{}: {}", self.dir.display(), e)))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with(&prefix) && n.ends_with(".json"));
            if matches {
                files.push(path);
            }
        }
        Ok(files)
    }

    fn read(path: &Path) -> Option<StoredCheckpoint> {
        let content = fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                warn!("⚠️  Ignoring unreadable checkpoint {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn latest(&self, key: &CheckpointKey, completed: bool) -> SimResult<Option<StoredCheckpoint>> {
        let latest = self
            .files_for(key)?
            .iter()
            .filter_map(|path| Self::read(path))
            .filter(|c| c.completed == completed && &c.key == key)
            .max_by_key(|c| (c.updated_at, c.created_at));
        Ok(latest)
    }

    fn save(&self, checkpoint: &StoredCheckpoint) -> SimResult<()> {
        let path = self.dir.join(Self::file_name(checkpoint));
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(checkpoint)?;
        fs::write(&tmp, content)
            .map_err(|e| SimulationError::FileWrite(format!("{}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| SimulationError::FileWrite(format!("{}: {}", path.display(), e)))?;
        debug!("💾 Checkpoint written: {}", path.display());
        Ok(())
    }

    fn prune(&self, key: &CheckpointKey, keep: Uuid) -> SimResult<usize> {
        let keep_suffix = format!("_{}.json", keep.simple());
        let mut removed = 0;
        for path in self.files_for(key)? {
            let is_kept = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(&keep_suffix));
            if !is_kept {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!("🧹 Removed {} old checkpoint files from {}", removed, self.dir.display());
        }
        Ok(removed)
    }
}

/// In-process store, used by tests and runs with checkpointing disabled
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: Mutex<HashMap<Uuid, StoredCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn guard(&self) -> SimResult<std::sync::MutexGuard<'_, HashMap<Uuid, StoredCheckpoint>>> {
        self.checkpoints
            .lock()
            .map_err(|_| SimulationError::Internal("checkpoint store lock poisoned".to_string()))
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn latest(&self, key: &CheckpointKey, completed: bool) -> SimResult<Option<StoredCheckpoint>> {
        Ok(self
            .guard()?
            .values()
            .filter(|c| &c.key == key && c.completed == completed)
            .max_by_key(|c| (c.updated_at, c.created_at))
            .cloned())
    }

    fn save(&self, checkpoint: &StoredCheckpoint) -> SimResult<()> {
        self.guard()?.insert(checkpoint.run_id, checkpoint.clone());
        Ok(())
    }

    fn prune(&self, key: &CheckpointKey, keep: Uuid) -> SimResult<usize> {
        let mut checkpoints = self.guard()?;
        let before = checkpoints.len();
        checkpoints.retain(|id, c| *id == keep || &c.key != key);
        Ok(before - checkpoints.len())
    }
}
