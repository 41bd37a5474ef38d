//! AdamW optimizer implementation
//!
//! AdamW with decoupled weight decay over a fixed set of named variables.
//! Moments are kept per variable name so they can be written to and read
//! back from a safetensors file when a checkpoint is taken.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{Device, Tensor, Var};

use crate::error::{Error, Result};

/// Key holding the step counter in the optimizer state file
const STEP_KEY: &str = "__step__";

/// AdamW hyperparameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamWConfig {
    /// Beta1 parameter (momentum)
    pub beta1: f64,
    /// Beta2 parameter (RMSprop)
    pub beta2: f64,
    /// Epsilon for numerical stability
    pub epsilon: f64,
    /// Weight decay coefficient
    pub weight_decay: f64,
}

impl Default for AdamWConfig {
    fn default() -> Self {
        Self {
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            weight_decay: 0.0,
        }
    }
}

/// AdamW optimizer with decoupled weight decay
pub struct AdamW {
    /// Parameters in a stable order
    params: Vec<(String, Var)>,
    config: AdamWConfig,
    /// Completed update count
    step_count: usize,
    /// First moment estimates (momentum)
    momentum: HashMap<String, Tensor>,
    /// Second moment estimates (RMSprop)
    variance: HashMap<String, Tensor>,
}

impl AdamW {
    pub fn new(params: Vec<(String, Var)>, config: AdamWConfig) -> Result<Self> {
        let mut momentum = HashMap::with_capacity(params.len());
        let mut variance = HashMap::with_capacity(params.len());
        for (name, var) in &params {
            let zeros = var.as_tensor().zeros_like()?;
            momentum.insert(name.clone(), zeros.clone());
            variance.insert(name.clone(), zeros);
        }
        Ok(Self {
            params,
            config,
            step_count: 0,
            momentum,
            variance,
        })
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn config(&self) -> &AdamWConfig {
        &self.config
    }

    /// Apply one update with `learning_rate`; parameters without a gradient
    /// are left untouched
    pub fn step(&mut self, gradients: &HashMap<String, Tensor>, learning_rate: f64) -> Result<()> {
        self.step_count += 1;
        let t = self.step_count as i32;
        let AdamWConfig {
            beta1,
            beta2,
            epsilon,
            weight_decay,
        } = self.config;
        let bias_correction1 = 1.0 - beta1.powi(t);
        let bias_correction2 = 1.0 - beta2.powi(t);

        for (name, var) in &self.params {
            let Some(grad) = gradients.get(name) else {
                continue;
            };
            let (Some(momentum), Some(variance)) =
                (self.momentum.get_mut(name), self.variance.get_mut(name))
            else {
                return Err(Error::training(format!("no optimizer state for {}", name)));
            };

            // m_t = β₁ * m_{t-1} + (1 - β₁) * g_t
            let new_momentum = ((&*momentum * beta1)? + (grad * (1.0 - beta1))?)?;
            // v_t = β₂ * v_{t-1} + (1 - β₂) * g_t²
            let new_variance = ((&*variance * beta2)? + (grad.sqr()? * (1.0 - beta2))?)?;

            let corrected_momentum = (&new_momentum / bias_correction1)?;
            let denominator = ((&new_variance / bias_correction2)?.sqrt()? + epsilon)?;
            let mut update = corrected_momentum.div(&denominator)?;

            let theta = var.as_tensor();
            if weight_decay > 0.0 {
                update = (update + (theta * weight_decay)?)?;
            }

            // θ_t = θ_{t-1} - α * (m̂_t / (√v̂_t + ε) + λ * θ_{t-1})
            var.set(&(theta - (update * learning_rate)?)?)?;

            *momentum = new_momentum;
            *variance = new_variance;
        }
        Ok(())
    }

    /// Write moments and the step count as safetensors
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut tensors: HashMap<String, Tensor> = HashMap::new();
        for (name, _) in &self.params {
            if let (Some(m), Some(v)) = (self.momentum.get(name), self.variance.get(name)) {
                tensors.insert(format!("{}.exp_avg", name), m.clone());
                tensors.insert(format!("{}.exp_avg_sq", name), v.clone());
            }
        }
        let step = u32::try_from(self.step_count)
            .map_err(|_| Error::checkpoint("optimizer step count overflows u32"))?;
        tensors.insert(STEP_KEY.to_string(), Tensor::new(&[step], &Device::Cpu)?);
        candle_core::safetensors::save(&tensors, path)?;
        Ok(())
    }

    /// Restore state written by [`Self::save`]
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let device = self
            .params
            .first()
            .map(|(_, var)| var.device().clone())
            .unwrap_or(Device::Cpu);
        let mut tensors = candle_core::safetensors::load(path, &device).map_err(|e| {
            Error::checkpoint(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let step = tensors
            .remove(STEP_KEY)
            .ok_or_else(|| Error::checkpoint(format!("{} has no step counter", path.display())))?
            .to_vec1::<u32>()?;
        self.step_count = step.first().copied().unwrap_or(0) as usize;

        for (name, var) in &self.params {
            let take = |tensors: &mut HashMap<String, Tensor>, suffix: &str| {
                let key = format!("{}.{}", name, suffix);
                tensors
                    .remove(&key)
                    .ok_or_else(|| Error::checkpoint(format!("optimizer state is missing {}", key)))
            };
            let m = take(&mut tensors, "exp_avg")?;
            let v = take(&mut tensors, "exp_avg_sq")?;
            if m.dims() != var.dims() || v.dims() != var.dims() {
                return Err(Error::checkpoint(format!(
                    "optimizer state for {} has shape {:?}, expected {:?}",
                    name,
                    m.dims(),
                    var.dims()
                )));
            }
            self.momentum.insert(name.clone(), m.to_dtype(var.dtype())?);
            self.variance.insert(name.clone(), v.to_dtype(var.dtype())?);
        }
        Ok(())
    }
}

/// Scale `gradients` in place so their global L2 norm is at most
/// `max_norm`; returns the norm before clipping
pub fn clip_grad_norm(gradients: &mut HashMap<String, Tensor>, max_norm: f64) -> Result<f64> {
    let mut sum_sq = 0.0f64;
    for grad in gradients.values() {
        sum_sq += grad.sqr()?.sum_all()?.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()?;
    }
    let total_norm = sum_sq.sqrt();
    if total_norm.is_finite() && total_norm > max_norm {
        let factor = max_norm / (total_norm + 1e-6);
        for grad in gradients.values_mut() {
            *grad = (&*grad * factor)?;
        }
    }
    Ok(total_norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::TempDir;

    fn scalar_param(value: f32) -> (String, Var) {
        let var = Var::from_tensor(&Tensor::new(&[value], &Device::Cpu).unwrap()).unwrap();
        ("w".to_string(), var)
    }

    fn value(var: &Var) -> f32 {
        var.as_tensor().to_vec1::<f32>().unwrap()[0]
    }

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let (name, var) = scalar_param(1.0);
        let mut optimizer = AdamW::new(vec![(name.clone(), var.clone())], AdamWConfig::default()).unwrap();

        let mut grads = HashMap::new();
        grads.insert(name, Tensor::new(&[0.5f32], &Device::Cpu).unwrap());
        optimizer.step(&grads, 0.1).unwrap();

        // With bias correction the first update is lr * sign(g)
        assert_relative_eq!(value(&var), 0.9, epsilon = 1e-5);
        assert_eq!(optimizer.step_count(), 1);
    }

    #[test]
    fn test_missing_gradient_leaves_param() {
        let (name, var) = scalar_param(2.0);
        let mut optimizer = AdamW::new(vec![(name, var.clone())], AdamWConfig::default()).unwrap();
        optimizer.step(&HashMap::new(), 0.1).unwrap();
        assert_relative_eq!(value(&var), 2.0);
    }

    #[test]
    fn test_state_survives_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("optimizer.safetensors");

        let (name, var) = scalar_param(1.0);
        let mut optimizer = AdamW::new(vec![(name.clone(), var.clone())], AdamWConfig::default()).unwrap();
        let mut grads = HashMap::new();
        grads.insert(name.clone(), Tensor::new(&[0.5f32], &Device::Cpu).unwrap());
        optimizer.step(&grads, 0.1).unwrap();
        optimizer.step(&grads, 0.1).unwrap();
        optimizer.save(&path).unwrap();

        let (_, fresh_var) = scalar_param(1.0);
        let mut restored = AdamW::new(vec![(name.clone(), fresh_var)], AdamWConfig::default()).unwrap();
        restored.load(&path).unwrap();
        assert_eq!(restored.step_count(), 2);
        let m = restored.momentum.get(&name).unwrap().to_vec1::<f32>().unwrap()[0];
        let expected = optimizer.momentum.get(&name).unwrap().to_vec1::<f32>().unwrap()[0];
        assert_relative_eq!(m, expected);
    }

    #[test]
    fn test_clip_grad_norm() {
        let mut grads = HashMap::new();
        grads.insert("a".to_string(), Tensor::new(&[3.0f32], &Device::Cpu).unwrap());
        grads.insert("b".to_string(), Tensor::new(&[4.0f32], &Device::Cpu).unwrap());

        let norm = clip_grad_norm(&mut grads, 1.0).unwrap();
        assert_relative_eq!(norm, 5.0, epsilon = 1e-6);
        let a = grads["a"].to_vec1::<f32>().unwrap()[0];
        let b = grads["b"].to_vec1::<f32>().unwrap()[0];
        assert_relative_eq!((a * a + b * b).sqrt(), 1.0, epsilon = 1e-4);
    }
}
