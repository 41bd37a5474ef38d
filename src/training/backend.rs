//! Seams between the training pipeline and a model implementation
//!
//! The controller never touches tensors directly. It asks a
//! [`ModelBackend`] for a tokenizer and a frozen base model, turns the model
//! into a [`TrainableModel`] by applying the adapter settings, then drives
//! it batch by batch.

use std::fmt;
use std::path::Path;

use super::dataset::TokenizedExample;
use super::tokenizer::TextTokenizer;
use crate::error::Result;
use crate::lora::LoraConfig;
use crate::runtime::ExecutionContext;

/// Row-major batch of fixed-length examples
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u32>>,
    pub labels: Vec<Vec<u32>>,
}

impl Batch {
    pub fn from_examples(examples: &[&TokenizedExample]) -> Self {
        Self {
            input_ids: examples.iter().map(|e| e.input_ids.clone()).collect(),
            attention_mask: examples.iter().map(|e| e.attention_mask.clone()).collect(),
            labels: examples.iter().map(|e| e.labels.clone()).collect(),
        }
    }

    /// Number of rows
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Sequence length (all rows share it)
    pub fn seq_len(&self) -> usize {
        self.input_ids.first().map(Vec::len).unwrap_or(0)
    }
}

/// Trainable and total parameter counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParameterCounts {
    pub trainable: usize,
    pub total: usize,
}

impl ParameterCounts {
    pub fn trainable_percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.trainable as f64 / self.total as f64
        }
    }
}

impl fmt::Display for ParameterCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trainable params: {} || all params: {} || trainable%: {:.4}",
            self.trainable,
            self.total,
            self.trainable_percent()
        )
    }
}

/// Source of tokenizers and base models
pub trait ModelBackend: Send + Sync {
    /// Load the tokenizer belonging to `model_id`
    fn load_tokenizer(
        &self,
        model_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<Box<dyn TextTokenizer>>;

    /// Load the frozen base model
    fn load_model(&self, model_id: &str, ctx: &ExecutionContext) -> Result<Box<dyn BaseModel>>;
}

/// A loaded base model whose parameters are frozen
pub trait BaseModel: Send {
    /// Attach low-rank adapters to the target projections
    fn apply_adapter(self: Box<Self>, settings: &LoraConfig) -> Result<Box<dyn TrainableModel>>;
}

/// A base model with trainable adapters attached
pub trait TrainableModel: Send {
    /// Forward and backward pass on one batch; gradients are scaled by
    /// `scale` and added to the pending ones. Returns the unscaled loss.
    fn accumulate(&mut self, batch: &Batch, scale: f64) -> Result<f64>;

    /// Apply pending gradients with `learning_rate`, clipping their global
    /// norm to `max_grad_norm` when given, then clear them
    fn apply_update(&mut self, learning_rate: f64, max_grad_norm: Option<f64>) -> Result<()>;

    /// Persist adapter weights and optimizer state into `dir`
    fn save_checkpoint(&self, dir: &Path) -> Result<()>;

    /// Restore what [`Self::save_checkpoint`] wrote
    fn load_checkpoint(&mut self, dir: &Path) -> Result<()>;

    /// Write the adapter (`adapter_model.safetensors` and
    /// `adapter_config.json`) into `dir`
    fn save_adapter(&self, dir: &Path, base_model: &str) -> Result<()>;

    fn parameter_counts(&self) -> ParameterCounts;
}
