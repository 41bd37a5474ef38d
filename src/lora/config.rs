//! LoRA configuration types and utilities

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main LoRA configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoraConfig {
    /// LoRA rank (size of the low-rank matrices)
    pub rank: usize,
    /// LoRA alpha (scaling factor)
    pub alpha: f32,
    /// Dropout probability applied to the adapter input while training
    pub dropout: f32,
    /// Target modules to apply LoRA to
    pub target_modules: Vec<String>,
    /// Bias configuration
    pub bias: BiasType,
    /// Task the adapter is trained for
    pub task_type: TaskType,
}

/// Types of bias handling in LoRA
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BiasType {
    /// No bias adaptation
    None,
    /// Adapt all bias terms
    All,
    /// Only adapt LoRA bias terms
    LoraOnly,
}

impl BiasType {
    /// PEFT spelling
    pub fn as_peft_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::All => "all",
            Self::LoraOnly => "lora_only",
        }
    }
}

/// Task types understood by PEFT
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskType {
    /// Next-token prediction
    #[serde(rename = "CAUSAL_LM")]
    CausalLm,
}

impl TaskType {
    /// PEFT spelling
    pub fn as_peft_str(&self) -> &'static str {
        match self {
            Self::CausalLm => "CAUSAL_LM",
        }
    }
}

/// Projections adapted in Llama-style decoders
pub const LLAMA_TARGET_MODULES: [&str; 7] = [
    "q_proj",
    "k_proj",
    "v_proj",
    "o_proj",
    "gate_proj",
    "up_proj",
    "down_proj",
];

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            rank: 8,
            alpha: 16.0,
            dropout: 0.05,
            target_modules: LLAMA_TARGET_MODULES.iter().map(|m| m.to_string()).collect(),
            bias: BiasType::None,
            task_type: TaskType::CausalLm,
        }
    }
}

impl LoraConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rank == 0 {
            return Err(Error::config("LoRA rank must be greater than 0"));
        }

        if self.alpha <= 0.0 {
            return Err(Error::config("LoRA alpha must be positive"));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::config("LoRA dropout must be in [0.0, 1.0)"));
        }

        if self.target_modules.is_empty() {
            return Err(Error::config("At least one target module must be specified"));
        }

        let mut unique_modules = HashSet::new();
        for module in &self.target_modules {
            if !unique_modules.insert(module) {
                return Err(Error::config(format!("Duplicate target module: {}", module)));
            }
        }

        Ok(())
    }

    /// Effective scaling factor (alpha / rank)
    pub fn scaling_factor(&self) -> f32 {
        self.alpha / self.rank as f32
    }

    /// Whether `module` (the last path segment of a layer name) is adapted
    pub fn targets(&self, module: &str) -> bool {
        self.target_modules.iter().any(|m| m == module)
    }

    /// Create a copy with different rank
    pub fn with_rank(&self, rank: usize) -> Self {
        let mut config = self.clone();
        config.rank = rank;
        config
    }

    /// Create a copy with different target modules
    pub fn with_target_modules(&self, modules: Vec<String>) -> Self {
        let mut config = self.clone();
        config.target_modules = modules;
        config
    }
}
