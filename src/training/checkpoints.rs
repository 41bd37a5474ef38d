//! Checkpoint discovery, retention and trainer state
//!
//! Checkpoints live in `checkpoint-<N>` directories where `N` is the global
//! optimizer step at save time. The most advanced checkpoint is the one with
//! the largest `N`; directories whose suffix is not a number sort below all
//! valid ones. Retention only ever deletes directories with a numeric
//! suffix.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Directory-name prefix of a checkpoint
pub const CHECKPOINT_PREFIX: &str = "checkpoint-";

/// Trainer state file inside a checkpoint
pub const TRAINER_STATE_FILE: &str = "trainer_state.json";

/// Default number of checkpoints kept on disk
pub const DEFAULT_SAVE_TOTAL_LIMIT: usize = 2;

/// Directory name for a checkpoint taken at `global_step`
pub fn checkpoint_name(global_step: usize) -> String {
    format!("{}{}", CHECKPOINT_PREFIX, global_step)
}

/// Ordering key of a checkpoint directory name: the integer after the last
/// `-`, `None` when it does not parse
pub fn checkpoint_step(name: &str) -> Option<u64> {
    name.rsplit_once('-')
        .and_then(|(_, suffix)| suffix.parse::<u64>().ok())
}

fn compare_names(a: &str, b: &str) -> Ordering {
    // None < Some(_), so unparsable names sort lowest
    checkpoint_step(a)
        .cmp(&checkpoint_step(b))
        .then_with(|| a.cmp(b))
}

/// Finds checkpoints under a checkpoint root
#[derive(Debug, Clone)]
pub struct CheckpointLocator {
    root: PathBuf,
}

impl CheckpointLocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All checkpoint directories, least advanced first. A missing root is
    /// an empty list.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::checkpoint(format!(
                    "Failed to list {}: {}",
                    self.root.display(),
                    e
                )))
            }
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(CHECKPOINT_PREFIX) {
                    names.push(name.to_string());
                }
            }
        }

        names.sort_by(|a, b| compare_names(a, b));
        Ok(names.into_iter().map(|name| self.root.join(name)).collect())
    }

    /// Checkpoint directories whose suffix is a step number, least advanced
    /// first
    pub fn list_numbered(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|path| TrainerState::step_from_dir_name(path).is_some())
            .collect())
    }

    /// The most advanced checkpoint, if any
    pub fn latest(&self) -> Result<Option<PathBuf>> {
        let latest = self.list()?.pop();
        if let Some(path) = &latest {
            debug!("Latest checkpoint: {}", path.display());
        }
        Ok(latest)
    }
}

/// Removes all but the most advanced checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointRetention {
    limit: Option<usize>,
}

impl Default for CheckpointRetention {
    fn default() -> Self {
        Self::new(Some(DEFAULT_SAVE_TOTAL_LIMIT))
    }
}

impl CheckpointRetention {
    /// `None` keeps everything
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Delete checkpoints beyond the limit, returning the removed paths
    pub fn prune(&self, locator: &CheckpointLocator) -> Result<Vec<PathBuf>> {
        let Some(limit) = self.limit else {
            return Ok(Vec::new());
        };
        let checkpoints = locator.list_numbered()?;
        let excess = checkpoints.len().saturating_sub(limit);
        Self::remove(&checkpoints[..excess])
    }

    /// Delete every numbered checkpoint under the locator's root
    pub fn clear(locator: &CheckpointLocator) -> Result<Vec<PathBuf>> {
        Self::remove(&locator.list_numbered()?)
    }

    fn remove(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        for path in paths {
            info!("Deleting older checkpoint {}", path.display());
            std::fs::remove_dir_all(path).map_err(|e| {
                Error::checkpoint(format!("Failed to delete {}: {}", path.display(), e))
            })?;
        }
        Ok(paths.to_vec())
    }
}

/// One progress record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub step: usize,
    /// Fractional epoch at the time of logging
    pub epoch: f64,
    pub loss: f64,
    pub learning_rate: f64,
}

/// Resumable position of the fit loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step: usize,
    /// Fractional epoch reached
    pub epoch: f64,
    pub max_steps: usize,
    pub num_train_epochs: usize,
    pub train_batch_size: usize,
    pub steps_per_epoch: usize,
    pub logging_steps: usize,
    pub seed: u64,
    pub log_history: Vec<LogRecord>,
    pub saved_at: DateTime<Utc>,
}

impl TrainerState {
    /// Write `trainer_state.json` into `dir`
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(TRAINER_STATE_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|e| {
            Error::checkpoint(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(())
    }

    /// Read `trainer_state.json` from `dir`
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(TRAINER_STATE_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::checkpoint(format!("Failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::checkpoint(format!("Invalid {}: {}", path.display(), e)))
    }

    /// Best-effort step count for a checkpoint without a readable state file
    pub fn step_from_dir_name(dir: &Path) -> Option<usize> {
        let name = dir.file_name()?.to_str()?;
        let step = checkpoint_step(name)?;
        usize::try_from(step).ok()
    }

    /// Load the state, falling back to the directory name for the step
    pub fn load_or_infer(dir: &Path) -> Result<Option<Self>> {
        match Self::load(dir) {
            Ok(state) => Ok(Some(state)),
            Err(e) if !dir.join(TRAINER_STATE_FILE).exists() => {
                warn!("{}; resuming from directory name only", e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}
