//! Llama-family decoder with trainable low-rank adapters
//!
//! Covers the Llama 3 and Qwen 2 checkpoints the resolver knows about: RMS
//! normalisation, rotary position embeddings (with the Llama 3 frequency
//! rescaling when configured), grouped-query attention and a SwiGLU MLP.
//! Every operation on the activation path is built from primitives that
//! candle can differentiate, so gradients flow back to the adapters while
//! the base weights stay plain tensors.

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Embedding, Linear, VarBuilder};
use serde::Deserialize;
use tracing::{debug, warn};

use super::lora_linear::{LoraAdapter, Projection};
use crate::error::{Error, Result};
use crate::lora::LoraConfig;

fn default_rope_theta() -> f32 {
    10_000.0
}

fn default_rms_norm_eps() -> f64 {
    1e-6
}

/// Rotary frequency rescaling from `config.json`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RopeScaling {
    #[serde(default, alias = "type")]
    pub rope_type: Option<String>,
    #[serde(default)]
    pub factor: f32,
    #[serde(default)]
    pub low_freq_factor: f32,
    #[serde(default)]
    pub high_freq_factor: f32,
    #[serde(default)]
    pub original_max_position_embeddings: usize,
}

/// The subset of a Hugging Face `config.json` the decoder needs
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LlamaConfig {
    pub hidden_size: usize,
    pub intermediate_size: usize,
    pub num_hidden_layers: usize,
    pub num_attention_heads: usize,
    #[serde(default)]
    pub num_key_value_heads: Option<usize>,
    #[serde(default)]
    pub head_dim: Option<usize>,
    pub vocab_size: usize,
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f32,
    #[serde(default)]
    pub rope_scaling: Option<RopeScaling>,
    #[serde(default)]
    pub tie_word_embeddings: bool,
}

impl LlamaConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            Error::model_loading(format!("Unsupported {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn num_kv_heads(&self) -> usize {
        self.num_key_value_heads.unwrap_or(self.num_attention_heads)
    }

    pub fn head_dim(&self) -> usize {
        self.head_dim
            .unwrap_or(self.hidden_size / self.num_attention_heads.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.num_attention_heads == 0 || self.num_kv_heads() == 0 {
            return Err(Error::model_loading("attention head count must be positive"));
        }
        if self.num_attention_heads % self.num_kv_heads() != 0 {
            return Err(Error::model_loading(format!(
                "{} attention heads cannot be grouped over {} key/value heads",
                self.num_attention_heads,
                self.num_kv_heads()
            )));
        }
        if self.head_dim() % 2 != 0 {
            return Err(Error::model_loading("rotary embeddings need an even head dimension"));
        }
        Ok(())
    }

    /// Inverse rotary frequencies, one per pair of head dimensions
    pub fn inv_freq(&self) -> Vec<f32> {
        let head_dim = self.head_dim();
        let base: Vec<f32> = (0..head_dim)
            .step_by(2)
            .map(|i| 1.0 / self.rope_theta.powf(i as f32 / head_dim as f32))
            .collect();

        let Some(scaling) = &self.rope_scaling else {
            return base;
        };
        if scaling.rope_type.as_deref() != Some("llama3") {
            warn!(
                "Ignoring unsupported rope scaling {:?}",
                scaling.rope_type.as_deref().unwrap_or("unknown")
            );
            return base;
        }

        let original = scaling.original_max_position_embeddings as f32;
        let low_freq_wavelen = original / scaling.low_freq_factor;
        let high_freq_wavelen = original / scaling.high_freq_factor;
        base.into_iter()
            .map(|freq| {
                let wavelen = 2.0 * std::f32::consts::PI / freq;
                if wavelen < high_freq_wavelen {
                    freq
                } else if wavelen > low_freq_wavelen {
                    freq / scaling.factor
                } else {
                    let smooth = (original / wavelen - scaling.low_freq_factor)
                        / (scaling.high_freq_factor - scaling.low_freq_factor);
                    (1.0 - smooth) * freq / scaling.factor + smooth * freq
                }
            })
            .collect()
    }
}

/// Projections of one decoder layer that can carry an adapter
pub const ATTENTION_PROJECTIONS: [&str; 4] = ["q_proj", "k_proj", "v_proj", "o_proj"];
pub const MLP_PROJECTIONS: [&str; 3] = ["gate_proj", "up_proj", "down_proj"];

fn load_projection(vb: &VarBuilder, in_dim: usize, out_dim: usize, name: &str) -> Result<Projection> {
    let vb = vb.pp(name);
    let weight = vb.get((out_dim, in_dim), "weight")?;
    let bias = if vb.contains_tensor("bias") {
        Some(vb.get(out_dim, "bias")?)
    } else {
        None
    };
    Ok(Projection::new(Linear::new(weight, bias)))
}

/// RMS normalisation, computed in f32
fn rms_norm(xs: &Tensor, weight: &Tensor, eps: f64) -> Result<Tensor> {
    let dtype = xs.dtype();
    let xs = xs.to_dtype(DType::F32)?;
    let mean_sq = xs.sqr()?.mean_keepdim(D::Minus1)?;
    let xs = xs.broadcast_div(&(mean_sq + eps)?.sqrt()?)?;
    Ok(xs.to_dtype(dtype)?.broadcast_mul(weight)?)
}

fn silu(xs: &Tensor) -> Result<Tensor> {
    Ok((xs / (xs.neg()?.exp()? + 1.0)?)?)
}

fn rotate_half(xs: &Tensor) -> Result<Tensor> {
    let half = xs.dim(D::Minus1)? / 2;
    let x1 = xs.narrow(D::Minus1, 0, half)?;
    let x2 = xs.narrow(D::Minus1, half, half)?;
    Ok(Tensor::cat(&[&x2.neg()?, &x1], D::Minus1)?)
}

fn apply_rotary(xs: &Tensor, cos: &Tensor, sin: &Tensor) -> Result<Tensor> {
    Ok((xs.broadcast_mul(cos)? + rotate_half(xs)?.broadcast_mul(sin)?)?)
}

#[derive(Debug, Clone)]
struct Attention {
    projections: [Projection; 4],
    num_heads: usize,
    num_kv_heads: usize,
    head_dim: usize,
}

impl Attention {
    fn load(vb: &VarBuilder, cfg: &LlamaConfig) -> Result<Self> {
        let hidden = cfg.hidden_size;
        let q_dim = cfg.num_attention_heads * cfg.head_dim();
        let kv_dim = cfg.num_kv_heads() * cfg.head_dim();
        Ok(Self {
            projections: [
                load_projection(vb, hidden, q_dim, "q_proj")?,
                load_projection(vb, hidden, kv_dim, "k_proj")?,
                load_projection(vb, hidden, kv_dim, "v_proj")?,
                load_projection(vb, q_dim, hidden, "o_proj")?,
            ],
            num_heads: cfg.num_attention_heads,
            num_kv_heads: cfg.num_kv_heads(),
            head_dim: cfg.head_dim(),
        })
    }

    fn forward_t(&self, xs: &Tensor, rope: &RopeTables, train: bool) -> Result<Tensor> {
        let (b, t, _) = xs.dims3()?;
        let [q_proj, k_proj, v_proj, o_proj] = &self.projections;

        let q = q_proj
            .forward_t(xs, train)?
            .reshape((b, t, self.num_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let k = k_proj
            .forward_t(xs, train)?
            .reshape((b, t, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;
        let v = v_proj
            .forward_t(xs, train)?
            .reshape((b, t, self.num_kv_heads, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()?;

        let q = apply_rotary(&q, &rope.cos, &rope.sin)?;
        let k = apply_rotary(&k, &rope.cos, &rope.sin)?;

        let n_rep = self.num_heads / self.num_kv_heads;
        let k = candle_transformers::utils::repeat_kv(k, n_rep)?.contiguous()?;
        let v = candle_transformers::utils::repeat_kv(v, n_rep)?.contiguous()?;

        let scores = (q.matmul(&k.t()?)? / (self.head_dim as f64).sqrt())?.to_dtype(DType::F32)?;
        let scores = rope
            .causal_mask
            .broadcast_as(scores.shape())?
            .where_cond(&rope.neg_inf.broadcast_as(scores.shape())?, &scores)?;
        let probs = candle_nn::ops::softmax(&scores, D::Minus1)?.to_dtype(v.dtype())?;

        let out = probs
            .matmul(&v)?
            .transpose(1, 2)?
            .reshape((b, t, self.num_heads * self.head_dim))?;
        o_proj.forward_t(&out, train)
    }
}

#[derive(Debug, Clone)]
struct Mlp {
    projections: [Projection; 3],
}

impl Mlp {
    fn load(vb: &VarBuilder, cfg: &LlamaConfig) -> Result<Self> {
        let (hidden, inter) = (cfg.hidden_size, cfg.intermediate_size);
        Ok(Self {
            projections: [
                load_projection(vb, hidden, inter, "gate_proj")?,
                load_projection(vb, hidden, inter, "up_proj")?,
                load_projection(vb, inter, hidden, "down_proj")?,
            ],
        })
    }

    fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let [gate, up, down] = &self.projections;
        let hidden = (silu(&gate.forward_t(xs, train)?)? * up.forward_t(xs, train)?)?;
        down.forward_t(&hidden, train)
    }
}

#[derive(Debug, Clone)]
struct DecoderLayer {
    attention: Attention,
    mlp: Mlp,
    input_norm: Tensor,
    post_attention_norm: Tensor,
}

impl DecoderLayer {
    fn load(vb: &VarBuilder, cfg: &LlamaConfig) -> Result<Self> {
        Ok(Self {
            attention: Attention::load(&vb.pp("self_attn"), cfg)?,
            mlp: Mlp::load(&vb.pp("mlp"), cfg)?,
            input_norm: vb.pp("input_layernorm").get(cfg.hidden_size, "weight")?,
            post_attention_norm: vb
                .pp("post_attention_layernorm")
                .get(cfg.hidden_size, "weight")?,
        })
    }

    fn forward_t(&self, xs: &Tensor, rope: &RopeTables, eps: f64, train: bool) -> Result<Tensor> {
        let hidden = rms_norm(xs, &self.input_norm, eps)?;
        let xs = (xs + self.attention.forward_t(&hidden, rope, train)?)?;
        let hidden = rms_norm(&xs, &self.post_attention_norm, eps)?;
        Ok((&xs + self.mlp.forward_t(&hidden, train)?)?)
    }

    fn projections_mut(&mut self) -> impl Iterator<Item = (&'static str, &'static str, &mut Projection)> {
        let attention = ATTENTION_PROJECTIONS
            .iter()
            .zip(self.attention.projections.iter_mut())
            .map(|(name, proj)| ("self_attn", *name, proj));
        let mlp = MLP_PROJECTIONS
            .iter()
            .zip(self.mlp.projections.iter_mut())
            .map(|(name, proj)| ("mlp", *name, proj));
        attention.chain(mlp)
    }

    fn projections(&self) -> impl Iterator<Item = (&'static str, &'static str, &Projection)> {
        let attention = ATTENTION_PROJECTIONS
            .iter()
            .zip(self.attention.projections.iter())
            .map(|(name, proj)| ("self_attn", *name, proj));
        let mlp = MLP_PROJECTIONS
            .iter()
            .zip(self.mlp.projections.iter())
            .map(|(name, proj)| ("mlp", *name, proj));
        attention.chain(mlp)
    }
}

/// Per-sequence-length rotary tables and causal mask
struct RopeTables {
    cos: Tensor,
    sin: Tensor,
    causal_mask: Tensor,
    neg_inf: Tensor,
}

impl RopeTables {
    fn new(inv_freq: &[f32], seq_len: usize, dtype: DType, device: &Device) -> Result<Self> {
        let half = inv_freq.len();
        let inv_freq = Tensor::from_vec(inv_freq.to_vec(), (1, half), device)?;
        let positions = Tensor::arange(0u32, seq_len as u32, device)?
            .to_dtype(DType::F32)?
            .reshape((seq_len, 1))?;
        let freqs = positions.matmul(&inv_freq)?;
        let freqs = Tensor::cat(&[&freqs, &freqs], D::Minus1)?;

        let mask: Vec<u8> = (0..seq_len)
            .flat_map(|i| (0..seq_len).map(move |j| u8::from(j > i)))
            .collect();

        Ok(Self {
            cos: freqs.cos()?.to_dtype(dtype)?,
            sin: freqs.sin()?.to_dtype(dtype)?,
            causal_mask: Tensor::from_vec(mask, (seq_len, seq_len), device)?,
            neg_inf: Tensor::new(f32::NEG_INFINITY, device)?,
        })
    }
}

/// A named adapter inside the model, `path` is the base module path such as
/// `model.layers.0.self_attn.q_proj`
pub struct NamedAdapter<'a> {
    pub path: String,
    pub adapter: &'a LoraAdapter,
}

/// Llama-family causal language model
#[derive(Debug, Clone)]
pub struct LlamaLora {
    config: LlamaConfig,
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: Tensor,
    lm_head: Linear,
    inv_freq: Vec<f32>,
    dtype: DType,
    device: Device,
}

impl LlamaLora {
    /// Build from weights in Hugging Face layout; nothing is trainable yet
    pub fn load(vb: VarBuilder, config: LlamaConfig) -> Result<Self> {
        config.validate()?;
        let model_vb = vb.pp("model");

        let embed_weight = model_vb
            .pp("embed_tokens")
            .get((config.vocab_size, config.hidden_size), "weight")?;
        let embed_tokens = Embedding::new(embed_weight.clone(), config.hidden_size);

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            layers.push(DecoderLayer::load(&model_vb.pp(format!("layers.{}", i)), &config)?);
        }
        debug!("Loaded {} decoder layers", layers.len());

        let norm = model_vb.pp("norm").get(config.hidden_size, "weight")?;
        let lm_head_weight = if config.tie_word_embeddings || !vb.contains_tensor("lm_head.weight") {
            embed_weight
        } else {
            vb.pp("lm_head")
                .get((config.vocab_size, config.hidden_size), "weight")?
        };

        Ok(Self {
            inv_freq: config.inv_freq(),
            dtype: vb.dtype(),
            device: vb.device().clone(),
            config,
            embed_tokens,
            layers,
            norm,
            lm_head: Linear::new(lm_head_weight, None),
        })
    }

    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Attach adapters to every projection `settings` targets; returns how
    /// many were attached
    pub fn attach_adapters(&mut self, settings: &LoraConfig) -> Result<usize> {
        let device = self.device.clone();
        let mut attached = 0;
        for layer in &mut self.layers {
            for (_, name, projection) in layer.projections_mut() {
                if settings.targets(name) {
                    projection.attach(settings, &device)?;
                    attached += 1;
                }
            }
        }
        if attached == 0 {
            return Err(Error::model_loading(format!(
                "none of the target modules {:?} exist in this model",
                settings.target_modules
            )));
        }
        Ok(attached)
    }

    /// Adapters in a stable order
    pub fn adapters(&self) -> Vec<NamedAdapter<'_>> {
        let mut out = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            for (block, name, projection) in layer.projections() {
                if let Some(adapter) = projection.adapter() {
                    out.push(NamedAdapter {
                        path: format!("model.layers.{}.{}.{}", i, block, name),
                        adapter,
                    });
                }
            }
        }
        out
    }

    /// Parameter count of the frozen base
    pub fn num_base_parameters(&self) -> usize {
        let projections: usize = self
            .layers
            .iter()
            .flat_map(|layer| layer.projections().map(|(_, _, p)| p.num_base_parameters()))
            .sum();
        let norms = self.layers.len() * 2 * self.config.hidden_size + self.config.hidden_size;
        let embed = self.config.vocab_size * self.config.hidden_size;
        let head = if self.config.tie_word_embeddings { 0 } else { embed };
        projections + norms + embed + head
    }

    /// Logits of shape `(batch, seq, vocab)` in f32
    pub fn forward_t(&self, input_ids: &Tensor, train: bool) -> Result<Tensor> {
        let (_, seq_len) = input_ids.dims2()?;
        let rope = RopeTables::new(&self.inv_freq, seq_len, self.dtype, &self.device)?;

        let mut xs = self.embed_tokens.forward(input_ids)?;
        for layer in &self.layers {
            xs = layer.forward_t(&xs, &rope, self.config.rms_norm_eps, train)?;
        }
        let xs = rms_norm(&xs, &self.norm, self.config.rms_norm_eps)?;
        Ok(self.lm_head.forward(&xs)?.to_dtype(DType::F32)?)
    }
}

/// Mean next-token cross-entropy over positions whose target is a real token
///
/// `logits` is `(batch, seq, vocab)`, `labels` and `attention_mask` are
/// `(batch, seq)`.
pub fn causal_lm_loss(logits: &Tensor, labels: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (_, seq_len, _) = logits.dims3()?;
    if seq_len < 2 {
        return Err(Error::training("sequences need at least two tokens"));
    }
    let logits = logits.narrow(1, 0, seq_len - 1)?.contiguous()?;
    let targets = labels.narrow(1, 1, seq_len - 1)?.contiguous()?;
    let mask = attention_mask
        .narrow(1, 1, seq_len - 1)?
        .to_dtype(DType::F32)?;

    let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
    let picked = log_probs
        .gather(&targets.unsqueeze(D::Minus1)?, D::Minus1)?
        .squeeze(D::Minus1)?;

    let count = mask.sum_all()?.to_scalar::<f32>()?;
    if count == 0.0 {
        return Err(Error::training("batch has no target tokens"));
    }
    Ok(((picked * mask)?.sum_all()?.neg()? / count as f64)?)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::collections::HashMap;

    pub(crate) fn tiny_config() -> LlamaConfig {
        LlamaConfig {
            hidden_size: 8,
            intermediate_size: 16,
            num_hidden_layers: 2,
            num_attention_heads: 2,
            num_key_value_heads: Some(1),
            head_dim: None,
            vocab_size: 12,
            rms_norm_eps: 1e-6,
            rope_theta: 10_000.0,
            rope_scaling: None,
            tie_word_embeddings: true,
        }
    }

    /// Random weights in Hugging Face layout for `tiny_config`
    pub(crate) fn tiny_weights(config: &LlamaConfig) -> HashMap<String, Tensor> {
        let device = Device::Cpu;
        let randn = |shape: (usize, usize)| Tensor::randn(0f32, 0.2, shape, &device).unwrap();
        let ones = |n: usize| Tensor::ones(n, DType::F32, &device).unwrap();
        let h = config.hidden_size;
        let kv = config.num_kv_heads() * config.head_dim();
        let i = config.intermediate_size;

        let mut weights = HashMap::new();
        weights.insert("model.embed_tokens.weight".to_string(), randn((config.vocab_size, h)));
        weights.insert("model.norm.weight".to_string(), ones(h));
        for layer in 0..config.num_hidden_layers {
            let p = format!("model.layers.{}", layer);
            for (name, shape) in [
                ("self_attn.q_proj", (h, h)),
                ("self_attn.k_proj", (kv, h)),
                ("self_attn.v_proj", (kv, h)),
                ("self_attn.o_proj", (h, h)),
                ("mlp.gate_proj", (i, h)),
                ("mlp.up_proj", (i, h)),
                ("mlp.down_proj", (h, i)),
            ] {
                weights.insert(format!("{}.{}.weight", p, name), randn(shape));
            }
            weights.insert(format!("{}.input_layernorm.weight", p), ones(h));
            weights.insert(format!("{}.post_attention_layernorm.weight", p), ones(h));
        }
        weights
    }

    fn tiny_model() -> LlamaLora {
        let config = tiny_config();
        let vb = VarBuilder::from_tensors(tiny_weights(&config), DType::F32, &Device::Cpu);
        LlamaLora::load(vb, config).unwrap()
    }

    #[test]
    fn test_config_parsing() {
        let json = r#"{
            "hidden_size": 2048, "intermediate_size": 8192, "num_hidden_layers": 16,
            "num_attention_heads": 32, "num_key_value_heads": 8, "vocab_size": 128256,
            "rms_norm_eps": 1e-05, "rope_theta": 500000.0, "tie_word_embeddings": true,
            "rope_scaling": {"factor": 32.0, "high_freq_factor": 4.0, "low_freq_factor": 1.0,
                             "original_max_position_embeddings": 8192, "rope_type": "llama3"}
        }"#;
        let config: LlamaConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.head_dim(), 64);
        assert_eq!(config.num_kv_heads(), 8);

        let inv_freq = config.inv_freq();
        assert_eq!(inv_freq.len(), 32);
        // Highest frequency untouched, lowest divided by the factor
        assert_relative_eq!(inv_freq[0], 1.0);
        let unscaled = 1.0 / 500000f32.powf(62.0 / 64.0);
        assert_relative_eq!(inv_freq[31], unscaled / 32.0, max_relative = 1e-4);
    }

    #[test]
    fn test_forward_shape() {
        let model = tiny_model();
        let ids = Tensor::new(&[[1u32, 2, 3, 0], [4, 5, 0, 0]], &Device::Cpu).unwrap();
        let logits = model.forward_t(&ids, false).unwrap();
        assert_eq!(logits.dims(), &[2, 4, 12]);
    }

    #[test]
    fn test_attach_adapters_to_all_targets() {
        let mut model = tiny_model();
        let attached = model.attach_adapters(&LoraConfig::default().with_rank(2)).unwrap();
        assert_eq!(attached, 14);
        let adapters = model.adapters();
        assert_eq!(adapters[0].path, "model.layers.0.self_attn.q_proj");
        assert_eq!(adapters[13].path, "model.layers.1.mlp.down_proj");

        let none = LoraConfig::default().with_target_modules(vec!["lm_head".into()]);
        assert!(tiny_model().attach_adapters(&none).is_err());
    }

    #[test]
    fn test_fresh_adapters_do_not_change_output() {
        let mut model = tiny_model();
        let ids = Tensor::new(&[[1u32, 2, 3]], &Device::Cpu).unwrap();
        let before = model.forward_t(&ids, false).unwrap();
        model.attach_adapters(&LoraConfig::default().with_rank(2)).unwrap();
        let after = model.forward_t(&ids, false).unwrap();
        let diff = (before - after)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_causal_mask_blocks_future_tokens() {
        let model = tiny_model();
        let a = Tensor::new(&[[1u32, 2, 3]], &Device::Cpu).unwrap();
        let b = Tensor::new(&[[1u32, 2, 9]], &Device::Cpu).unwrap();
        let la = model.forward_t(&a, false).unwrap().narrow(1, 0, 2).unwrap();
        let lb = model.forward_t(&b, false).unwrap().narrow(1, 0, 2).unwrap();
        let diff = (la - lb).unwrap().abs().unwrap().max_all().unwrap().to_scalar::<f32>().unwrap();
        assert!(diff < 1e-5);
    }

    #[test]
    fn test_loss_ignores_padding_targets() {
        // Uniform logits over 4 classes give ln(4) per counted position
        let logits = Tensor::zeros((1, 4, 4), DType::F32, &Device::Cpu).unwrap();
        let labels = Tensor::new(&[[1u32, 2, 0, 0]], &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1u32, 1, 0, 0]], &Device::Cpu).unwrap();
        let loss = causal_lm_loss(&logits, &labels, &mask)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert_relative_eq!(loss, 4f32.ln(), max_relative = 1e-5);

        let no_targets = Tensor::new(&[[1u32, 0, 0, 0]], &Device::Cpu).unwrap();
        assert!(causal_lm_loss(&logits, &labels, &no_targets).is_err());
    }
}
