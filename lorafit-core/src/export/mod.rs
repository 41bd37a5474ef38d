//! Artifact export
//!
//! After training, the output directory must hold everything the serving
//! runtime needs: the adapter weights, a PEFT `adapter_config.json` and a
//! `Modelfile` pointing at both the base model and the adapter.

pub mod modelfile;

use std::path::{Path, PathBuf};

use lorafit::lora::{ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE};
use lorafit::{
    Error, LoraConfig, ModelAliases, PeftConfig, ResolvedModel, Result, RunConfiguration,
    TrainableModel,
};
use safetensors::SafeTensors;
use tracing::{info, warn};

pub use modelfile::{ServingManifest, DEFAULT_SYSTEM_PROMPT, MODELFILE_NAME};

/// What an export left in the output directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub adapter_weights: PathBuf,
    pub adapter_config: PathBuf,
    /// Whether `adapter_config.json` had to be written by the exporter
    pub config_synthesized: bool,
    pub modelfile: PathBuf,
    pub tensor_count: usize,
}

/// Writes and checks the serving artifacts of a run
#[derive(Debug, Clone)]
pub struct ArtifactExporter {
    output_dir: PathBuf,
    adapter: LoraConfig,
    system_prompt: String,
}

impl ArtifactExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            adapter: LoraConfig::default(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    /// Exporter for the output directory and system prompt of a run
    pub fn from_run(config: &RunConfiguration) -> Self {
        let exporter = Self::new(&config.output_dir);
        match &config.system_prompt {
            Some(prompt) => exporter.with_system_prompt(prompt.clone()),
            None => exporter,
        }
    }

    /// Adapter settings used when the config file has to be synthesized
    pub fn with_adapter(mut self, adapter: LoraConfig) -> Self {
        self.adapter = adapter;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn adapter_weights_path(&self) -> PathBuf {
        self.output_dir.join(ADAPTER_WEIGHTS_FILE)
    }

    pub fn adapter_config_path(&self) -> PathBuf {
        self.output_dir.join(ADAPTER_CONFIG_FILE)
    }

    /// Save the adapter, check it landed, fill in its config and write the
    /// serving manifest
    pub fn export(
        &self,
        model: &dyn TrainableModel,
        base: &ResolvedModel,
        aliases: &ModelAliases,
    ) -> Result<ExportReport> {
        info!("STEP 6/6: Saving LoRA adapter...");
        std::fs::create_dir_all(&self.output_dir)?;
        model.save_adapter(&self.output_dir, &base.id)?;

        let tensor_count = self.verify()?;
        let config_synthesized = self.ensure_adapter_config(&base.id)?;
        let modelfile = self.write_manifest(&aliases.serving_tag(base))?;

        Ok(ExportReport {
            adapter_weights: self.adapter_weights_path(),
            adapter_config: self.adapter_config_path(),
            config_synthesized,
            modelfile,
            tensor_count,
        })
    }

    /// The weight file is the success signal of the save step: it must exist
    /// and carry a readable safetensors payload. Returns the tensor count.
    pub fn verify(&self) -> Result<usize> {
        let path = self.adapter_weights_path();
        if !path.is_file() {
            return Err(Error::MissingAdapter(path));
        }

        let bytes = std::fs::read(&path)?;
        let tensors = SafeTensors::deserialize(&bytes).map_err(|e| {
            Error::export(format!("{} is not a valid safetensors file: {}", path.display(), e))
        })?;
        let count = tensors.names().len();
        if count == 0 {
            return Err(Error::export(format!("{} holds no tensors", path.display())));
        }
        info!("Adapter weights verified: {} tensors in {}", count, path.display());
        Ok(count)
    }

    /// Write `adapter_config.json` unless the model already saved one.
    /// Returns whether it was synthesized.
    pub fn ensure_adapter_config(&self, base_model: &str) -> Result<bool> {
        let path = self.adapter_config_path();
        if path.is_file() {
            return Ok(false);
        }
        warn!("{} missing; writing it from the adapter settings", ADAPTER_CONFIG_FILE);
        PeftConfig::from_lora(&self.adapter, base_model).write(&path)?;
        Ok(true)
    }

    /// Always (re)write the `Modelfile`
    pub fn write_manifest(&self, serving_tag: &str) -> Result<PathBuf> {
        let path = ServingManifest::new(serving_tag)
            .with_system_prompt(self.system_prompt.clone())
            .write(&self.output_dir)?;
        info!("Wrote {} (FROM {})", path.display(), serving_tag);
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safetensors::tensor::{Dtype, TensorView};
    use tempfile::TempDir;

    fn write_weights(dir: &Path) {
        let data: Vec<u8> = [1f32, 2., 3., 4.].iter().flat_map(|v| v.to_le_bytes()).collect();
        let view = TensorView::new(Dtype::F32, vec![2, 2], &data).unwrap();
        let bytes = safetensors::serialize(
            [("base_model.model.model.layers.0.self_attn.q_proj.lora_A.weight", view)],
            &None,
        )
        .unwrap();
        std::fs::write(dir.join(ADAPTER_WEIGHTS_FILE), bytes).unwrap();
    }

    #[test]
    fn test_verify_missing_adapter() {
        let dir = TempDir::new().unwrap();
        let err = ArtifactExporter::new(dir.path()).verify().unwrap_err();
        assert!(matches!(err, Error::MissingAdapter(ref p) if p.ends_with(ADAPTER_WEIGHTS_FILE)));
        assert!(err.is_post_condition());
    }

    #[test]
    fn test_verify_corrupt_adapter() {
        let dir = TempDir::new().unwrap();
        let truncated = b"\x08\x00\x00\x00\x00\x00\x00\x00{";
        std::fs::write(dir.path().join(ADAPTER_WEIGHTS_FILE), truncated).unwrap();
        let err = ArtifactExporter::new(dir.path()).verify().unwrap_err();
        assert!(matches!(err, Error::Export(_)));
    }

    #[test]
    fn test_verify_counts_tensors() {
        let dir = TempDir::new().unwrap();
        write_weights(dir.path());
        assert_eq!(ArtifactExporter::new(dir.path()).verify().unwrap(), 1);
    }

    #[test]
    fn test_adapter_config_synthesized_only_when_missing() {
        let dir = TempDir::new().unwrap();
        let exporter = ArtifactExporter::new(dir.path());

        assert!(exporter.ensure_adapter_config("meta-llama/Llama-3.2-1B-Instruct").unwrap());
        let config = PeftConfig::read(&exporter.adapter_config_path()).unwrap();
        assert_eq!(config.r, 8);
        assert_eq!(config.base_model_name_or_path, "meta-llama/Llama-3.2-1B-Instruct");
        assert!(config.inference_mode);

        std::fs::write(exporter.adapter_config_path(), "{\"r\": 4}").unwrap();
        assert!(!exporter.ensure_adapter_config("other").unwrap());
        let kept = std::fs::read_to_string(exporter.adapter_config_path()).unwrap();
        assert_eq!(kept, "{\"r\": 4}");
    }

    #[test]
    fn test_manifest_uses_configured_prompt() {
        let dir = TempDir::new().unwrap();
        let path = ArtifactExporter::new(dir.path())
            .with_system_prompt("Answer in one sentence.")
            .write_manifest("qwen2.5:0.5b")
            .unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("SYSTEM \"Answer in one sentence.\"\n"));
    }
}
