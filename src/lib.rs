//! lorafit - Resumable LoRA fine-tuning for causal language models
//!
//! This crate provides the training side of lorafit: run configuration,
//! model identifier resolution, the tokenized instruction dataset, a
//! checkpoint-aware training controller and a candle implementation of the
//! model backend. Packaging for a serving runtime and the command-line entry
//! point live in `lorafit-core`.

#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod error;
pub mod lora;
pub mod models;
pub mod resolver;
pub mod runtime;
pub mod training;

// Re-exports
pub use config::{CommandLineValues, FileConfig, ResumePolicy, RunConfiguration};
pub use error::{Error, Result};
pub use lora::{LoraConfig, PeftConfig};
pub use models::CandleBackend;
pub use resolver::{resolve_model_id, ModelAliases, ResolvedModel};
pub use runtime::{ExecutionContext, Precision};
pub use training::{
    CheckpointLocator, CheckpointRetention, DatasetBuilder, ModelBackend, PipelineStage,
    TrainableModel, TrainingController, TrainingEvent, TrainingOutcome,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
