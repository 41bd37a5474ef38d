//! Pipeline stage tracking

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{Error, Result};

/// Stages of a training run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    NotStarted,
    TokenizerLoaded,
    DatasetReady,
    ModelLoaded,
    AdapterApplied,
    Training,
    Complete,
    Failed,
}

impl PipelineStage {
    /// The only stage reachable on success
    pub fn successor(self) -> Option<Self> {
        match self {
            Self::NotStarted => Some(Self::TokenizerLoaded),
            Self::TokenizerLoaded => Some(Self::DatasetReady),
            Self::DatasetReady => Some(Self::ModelLoaded),
            Self::ModelLoaded => Some(Self::AdapterApplied),
            Self::AdapterApplied => Some(Self::Training),
            Self::Training => Some(Self::Complete),
            Self::Complete | Self::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    /// Progress line announced when work towards this stage begins
    pub fn label(self) -> Option<&'static str> {
        match self {
            Self::TokenizerLoaded => Some("STEP 1/6: Loading tokenizer..."),
            Self::DatasetReady => Some("STEP 2/6: Building & tokenizing dataset..."),
            Self::ModelLoaded => {
                Some("STEP 3/6: Loading base model (this can take a while the first time)...")
            }
            Self::AdapterApplied => Some("STEP 4/6: Applying LoRA adapters..."),
            Self::Training => Some("STEP 5/6: Starting training..."),
            _ => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Enforces the stage order of one run
#[derive(Debug, Clone)]
pub struct StageTracker {
    stage: PipelineStage,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            stage: PipelineStage::NotStarted,
        }
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    fn check(&self, next: PipelineStage) -> Result<()> {
        if self.stage.successor() != Some(next) {
            return Err(Error::InvalidTransition {
                from: self.stage.to_string(),
                to: next.to_string(),
            });
        }
        Ok(())
    }

    /// Move to `next` without associated work
    pub fn advance(&mut self, next: PipelineStage) -> Result<()> {
        self.check(next)?;
        if let Some(label) = next.label() {
            info!("{}", label);
        }
        self.stage = next;
        Ok(())
    }

    /// Announce `next`, run `work`, and move to `next` once it succeeds.
    /// A failing `work` moves the tracker to `Failed`.
    pub fn enter<T>(&mut self, next: PipelineStage, work: impl FnOnce() -> Result<T>) -> Result<T> {
        self.check(next)?;
        if let Some(label) = next.label() {
            info!("{}", label);
        }
        match work() {
            Ok(value) => {
                self.stage = next;
                Ok(value)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    /// Mark the run failed; a terminal stage is left untouched
    pub fn fail(&mut self, reason: &dyn fmt::Display) {
        if self.stage.is_terminal() {
            return;
        }
        error!("Pipeline failed during {}: {}", self.stage, reason);
        self.stage = PipelineStage::Failed;
    }
}
