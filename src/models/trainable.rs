//! Candle implementation of the training backend traits

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::VarBuilder;
use tracing::{debug, info};

use super::files::ModelSource;
use super::llama::{causal_lm_loss, LlamaConfig, LlamaLora};
use crate::error::{Error, Result};
use crate::lora::{LoraConfig, PeftConfig, ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE};
use crate::runtime::ExecutionContext;
use crate::training::backend::{Batch, BaseModel, ModelBackend, ParameterCounts, TrainableModel};
use crate::training::optimizers::{clip_grad_norm, AdamW, AdamWConfig};
use crate::training::tokenizer::{HfTokenizer, TextTokenizer};

/// Optimizer state file inside a checkpoint
pub const OPTIMIZER_STATE_FILE: &str = "optimizer.safetensors";

/// PEFT key of an adapter matrix for the module at `path`
pub fn peft_key(path: &str, matrix: &str) -> String {
    format!("base_model.model.{}.{}.weight", path, matrix)
}

/// Loads Llama-family models with candle
#[derive(Debug, Clone, Default)]
pub struct CandleBackend;

impl CandleBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ModelBackend for CandleBackend {
    fn load_tokenizer(
        &self,
        model_id: &str,
        ctx: &ExecutionContext,
    ) -> Result<Box<dyn TextTokenizer>> {
        let source = ModelSource::new(model_id, ctx.hub_token());
        let (tokenizer, tokenizer_config) = source.tokenizer_files()?;
        let tokenizer = HfTokenizer::from_files(&tokenizer, tokenizer_config.as_deref())?;
        debug!("Loaded tokenizer: {:?}", tokenizer);
        Ok(Box::new(tokenizer))
    }

    fn load_model(&self, model_id: &str, ctx: &ExecutionContext) -> Result<Box<dyn BaseModel>> {
        let source = ModelSource::new(model_id, ctx.hub_token());
        let config = LlamaConfig::from_file(&source.config_file()?)?;
        let weight_files = source.weight_files()?;

        let device = ctx.device();
        let mut tensors = HashMap::new();
        for file in &weight_files {
            let shard = candle_core::safetensors::load(file, device).map_err(|e| {
                Error::model_loading(format!("Failed to load {}: {}", file.display(), e))
            })?;
            tensors.extend(shard);
        }
        info!(
            "Loaded {} tensors from {} file(s) onto {:?} as {:?}",
            tensors.len(),
            weight_files.len(),
            device,
            ctx.precision().dtype()
        );

        let vb = VarBuilder::from_tensors(tensors, ctx.precision().dtype(), device);
        let model = LlamaLora::load(vb, config)
            .map_err(|e| Error::model_loading(format!("Failed to build {}: {}", model_id, e)))?;
        Ok(Box::new(LlamaBase { model }))
    }
}

/// A loaded base model, nothing trainable yet
pub struct LlamaBase {
    model: LlamaLora,
}

impl LlamaBase {
    pub fn new(model: LlamaLora) -> Self {
        Self { model }
    }
}

impl BaseModel for LlamaBase {
    fn apply_adapter(self: Box<Self>, settings: &LoraConfig) -> Result<Box<dyn TrainableModel>> {
        Ok(Box::new(LoraLlama::new(self.model, settings.clone())?))
    }
}

/// Llama with adapters, its optimizer and pending gradients
pub struct LoraLlama {
    model: LlamaLora,
    settings: LoraConfig,
    /// Trainable variables keyed by PEFT name
    params: Vec<(String, Var)>,
    optimizer: AdamW,
    pending: HashMap<String, Tensor>,
}

impl LoraLlama {
    pub fn new(mut model: LlamaLora, settings: LoraConfig) -> Result<Self> {
        settings.validate()?;
        let attached = model.attach_adapters(&settings)?;
        debug!("Attached {} adapters (r={})", attached, settings.rank);

        let params: Vec<(String, Var)> = model
            .adapters()
            .into_iter()
            .flat_map(|named| {
                [
                    (peft_key(&named.path, "lora_A"), named.adapter.a().clone()),
                    (peft_key(&named.path, "lora_B"), named.adapter.b().clone()),
                ]
            })
            .collect();
        let optimizer = AdamW::new(params.clone(), AdamWConfig::default())?;

        Ok(Self {
            model,
            settings,
            params,
            optimizer,
            pending: HashMap::new(),
        })
    }

    fn batch_tensors(&self, batch: &Batch) -> Result<(Tensor, Tensor, Tensor)> {
        let device = self.model.device();
        let rows = batch.len();
        let cols = batch.seq_len();
        let flat = |rows_data: &[Vec<u32>]| -> Result<Tensor> {
            let data: Vec<u32> = rows_data.iter().flatten().copied().collect();
            if data.len() != rows * cols {
                return Err(Error::training("batch rows have different lengths"));
            }
            Ok(Tensor::from_vec(data, (rows, cols), device)?)
        };
        Ok((
            flat(&batch.input_ids)?,
            flat(&batch.labels)?,
            flat(&batch.attention_mask)?,
        ))
    }

    fn adapter_tensors(&self) -> HashMap<String, Tensor> {
        self.params
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect()
    }

    pub fn settings(&self) -> &LoraConfig {
        &self.settings
    }
}

impl TrainableModel for LoraLlama {
    fn accumulate(&mut self, batch: &Batch, scale: f64) -> Result<f64> {
        if batch.is_empty() {
            return Err(Error::training("empty batch"));
        }
        let (input_ids, labels, attention_mask) = self.batch_tensors(batch)?;
        let logits = self.model.forward_t(&input_ids, true)?;
        let loss = causal_lm_loss(&logits, &labels, &attention_mask)?;
        let grads = loss.backward()?;

        for (name, var) in &self.params {
            let Some(grad) = grads.get(var.as_tensor()) else {
                continue;
            };
            let scaled = (grad * scale)?;
            let total = match self.pending.remove(name) {
                Some(previous) => (previous + scaled)?,
                None => scaled,
            };
            self.pending.insert(name.clone(), total);
        }

        Ok(loss.to_dtype(DType::F64)?.to_scalar::<f64>()?)
    }

    fn apply_update(&mut self, learning_rate: f64, max_grad_norm: Option<f64>) -> Result<()> {
        if let Some(max_norm) = max_grad_norm {
            let norm = clip_grad_norm(&mut self.pending, max_norm)?;
            debug!("grad_norm={:.4}", norm);
        }
        self.optimizer.step(&self.pending, learning_rate)?;
        self.pending.clear();
        Ok(())
    }

    fn save_checkpoint(&self, dir: &Path) -> Result<()> {
        candle_core::safetensors::save(&self.adapter_tensors(), dir.join(ADAPTER_WEIGHTS_FILE))?;
        self.optimizer.save(&dir.join(OPTIMIZER_STATE_FILE))?;
        Ok(())
    }

    fn load_checkpoint(&mut self, dir: &Path) -> Result<()> {
        let path = dir.join(ADAPTER_WEIGHTS_FILE);
        let saved = candle_core::safetensors::load(&path, self.model.device()).map_err(|e| {
            Error::checkpoint(format!("Failed to read {}: {}", path.display(), e))
        })?;
        for (name, var) in &self.params {
            let tensor = saved.get(name).ok_or_else(|| {
                Error::checkpoint(format!("{} is missing {}", path.display(), name))
            })?;
            if tensor.dims() != var.dims() {
                return Err(Error::checkpoint(format!(
                    "{} has shape {:?} in {}, expected {:?}",
                    name,
                    tensor.dims(),
                    path.display(),
                    var.dims()
                )));
            }
            var.set(&tensor.to_dtype(var.dtype())?)?;
        }

        let optimizer_path = dir.join(OPTIMIZER_STATE_FILE);
        if optimizer_path.exists() {
            self.optimizer.load(&optimizer_path)?;
        } else {
            info!("No optimizer state in {}, moments start from zero", dir.display());
        }
        self.pending.clear();
        Ok(())
    }

    fn save_adapter(&self, dir: &Path, base_model: &str) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let tensors: HashMap<String, Tensor> = self
            .adapter_tensors()
            .into_iter()
            .map(|(name, tensor)| -> Result<(String, Tensor)> {
                Ok((name, tensor.to_device(&Device::Cpu)?))
            })
            .collect::<Result<_>>()?;
        candle_core::safetensors::save(&tensors, dir.join(ADAPTER_WEIGHTS_FILE))?;
        PeftConfig::from_lora(&self.settings, base_model).write(&dir.join(ADAPTER_CONFIG_FILE))?;
        Ok(())
    }

    fn parameter_counts(&self) -> ParameterCounts {
        let trainable: usize = self.params.iter().map(|(_, var)| var.elem_count()).sum();
        ParameterCounts {
            trainable,
            total: self.model.num_base_parameters() + trainable,
        }
    }
}
