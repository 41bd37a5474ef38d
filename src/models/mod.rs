//! Candle-backed model implementation
//!
//! Supplies the [`ModelBackend`](crate::training::ModelBackend) used by the
//! command-line tool: files come from a local directory or the Hugging Face
//! hub, the decoder is a Llama-family network whose target projections carry
//! trainable LoRA adapters.

pub mod files;
pub mod llama;
pub mod lora_linear;
pub mod trainable;

pub use files::ModelSource;
pub use llama::{LlamaConfig, LlamaLora};
pub use lora_linear::{LoraAdapter, Projection};
pub use trainable::{CandleBackend, LlamaBase, LoraLlama, OPTIMIZER_STATE_FILE};
