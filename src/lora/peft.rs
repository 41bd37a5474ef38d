//! PEFT adapter descriptor (`adapter_config.json`)
//!
//! The serving runtime and the PEFT library both read this file next to the
//! adapter weights to learn the rank, scaling and which projections were
//! adapted.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::config::LoraConfig;
use crate::error::Result;

/// PEFT configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeftConfig {
    /// Base model name or path
    pub base_model_name_or_path: String,
    /// Bias configuration
    pub bias: String,
    /// Whether the adapter is in inference mode
    pub inference_mode: bool,
    /// LoRA alpha scaling factor
    pub lora_alpha: f32,
    /// LoRA dropout
    pub lora_dropout: f32,
    /// PEFT adapter type (always "LORA" for LoRA adapters)
    pub peft_type: String,
    /// LoRA rank
    pub r: usize,
    /// Target modules to apply LoRA to
    pub target_modules: Vec<String>,
    /// Task type for the adapter
    pub task_type: String,
}

impl PeftConfig {
    /// Describe an adapter trained with `lora` on top of `base_model`
    pub fn from_lora(lora: &LoraConfig, base_model: &str) -> Self {
        Self {
            base_model_name_or_path: base_model.to_string(),
            bias: lora.bias.as_peft_str().to_string(),
            inference_mode: true,
            lora_alpha: lora.alpha,
            lora_dropout: lora.dropout,
            peft_type: "LORA".to_string(),
            r: lora.rank,
            target_modules: lora.target_modules.clone(),
            task_type: lora.task_type.as_peft_str().to_string(),
        }
    }

    /// Write as pretty-printed JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a descriptor back
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_default_lora() {
        let config = PeftConfig::from_lora(&LoraConfig::default(), "meta-llama/Llama-3.2-1B-Instruct");
        assert_eq!(config.peft_type, "LORA");
        assert_eq!(config.task_type, "CAUSAL_LM");
        assert_eq!(config.bias, "none");
        assert_eq!(config.r, 8);
        assert_eq!(config.lora_alpha, 16.0);
        assert!(config.inference_mode);
        assert_eq!(config.base_model_name_or_path, "meta-llama/Llama-3.2-1B-Instruct");
    }

    #[test]
    fn test_written_file_is_human_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("adapter_config.json");
        let config = PeftConfig::from_lora(&LoraConfig::default(), "base");
        config.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n  \"r\": 8"));
        assert_eq!(PeftConfig::read(&path).unwrap(), config);
    }
}
