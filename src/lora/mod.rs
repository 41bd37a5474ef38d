//! LoRA (Low-Rank Adaptation) settings and on-disk adapter layout

pub mod config;
pub mod peft;

pub use config::{BiasType, LoraConfig, TaskType, LLAMA_TARGET_MODULES};
pub use peft::PeftConfig;

/// Adapter weight file; its presence marks a successful run
pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";

/// Adapter descriptor file
pub const ADAPTER_CONFIG_FILE: &str = "adapter_config.json";
