//! Training pipeline
//!
//! This module holds everything between a resolved run configuration and a
//! trained adapter:
//!
//! - **Tokenizer**: the [`TextTokenizer`] seam and its `tokenizers` implementation
//! - **Dataset**: JSONL records to fixed-length tokenized examples
//! - **Checkpoints**: discovery, retention and the persisted trainer state
//! - **Backend**: traits a model implementation provides to the controller
//! - **Optimizers**: AdamW and the linear learning-rate schedule
//! - **Controller**: the stage state machine and resumable fit loop
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use lorafit::training::TrainingController;
//!
//! let mut controller = TrainingController::new(&backend, &ctx, &config, model.id.as_str());
//! let outcome = ctx.install(|| controller.run())?;
//! ```

pub mod backend;
pub mod checkpoints;
pub mod controller;
pub mod dataset;
pub mod optimizers;
pub mod state;
pub mod tokenizer;

pub use backend::{Batch, BaseModel, ModelBackend, ParameterCounts, TrainableModel};
pub use checkpoints::{
    CheckpointLocator, CheckpointRetention, LogRecord, TrainerState, CHECKPOINT_PREFIX,
    TRAINER_STATE_FILE,
};
pub use controller::{TrainingArguments, TrainingController, TrainingEvent, TrainingOutcome};
pub use dataset::{DatasetBuilder, TokenizedDataset, TokenizedExample, TrainingExample};
pub use optimizers::{AdamW, AdamWConfig, LinearScheduler};
pub use state::{PipelineStage, StageTracker};
pub use tokenizer::{HfTokenizer, TextTokenizer};
