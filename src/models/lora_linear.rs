//! Frozen linear projections with an optional low-rank adapter

use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::Linear;

use crate::error::Result;
use crate::lora::LoraConfig;

/// Trainable `B·A` update added to a frozen projection
#[derive(Debug, Clone)]
pub struct LoraAdapter {
    /// Down projection, shape `(rank, in_features)`
    a: Var,
    /// Up projection, shape `(out_features, rank)`
    b: Var,
    scaling: f64,
    dropout: f32,
}

impl LoraAdapter {
    /// A is kaiming-uniform initialised, B starts at zero so the adapted
    /// model initially equals the base model
    pub fn new(in_features: usize, out_features: usize, config: &LoraConfig, device: &Device) -> Result<Self> {
        let bound = 1.0 / (in_features as f32).sqrt();
        let a = Var::from_tensor(&Tensor::rand(
            -bound,
            bound,
            (config.rank, in_features),
            device,
        )?)?;
        let b = Var::zeros((out_features, config.rank), DType::F32, device)?;
        Ok(Self {
            a,
            b,
            scaling: config.scaling_factor() as f64,
            dropout: config.dropout,
        })
    }

    pub fn a(&self) -> &Var {
        &self.a
    }

    pub fn b(&self) -> &Var {
        &self.b
    }

    /// `scaling · B(A(dropout(x)))`, computed in f32
    pub fn delta(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let xs = xs.to_dtype(DType::F32)?;
        let xs = if train && self.dropout > 0.0 {
            candle_nn::ops::dropout(&xs, self.dropout)?
        } else {
            xs
        };
        let hidden = xs.broadcast_matmul(&self.a.as_tensor().t()?)?;
        let out = hidden.broadcast_matmul(&self.b.as_tensor().t()?)?;
        Ok((out * self.scaling)?)
    }

    pub fn num_parameters(&self) -> usize {
        self.a.elem_count() + self.b.elem_count()
    }
}

/// A projection of the base model
#[derive(Debug, Clone)]
pub struct Projection {
    base: Linear,
    in_features: usize,
    out_features: usize,
    lora: Option<LoraAdapter>,
}

impl Projection {
    pub fn new(base: Linear) -> Self {
        let (out_features, in_features) = base.weight().dims2().unwrap_or((0, 0));
        Self {
            base,
            in_features,
            out_features,
            lora: None,
        }
    }

    /// Attach a fresh adapter
    pub fn attach(&mut self, config: &LoraConfig, device: &Device) -> Result<()> {
        self.lora = Some(LoraAdapter::new(
            self.in_features,
            self.out_features,
            config,
            device,
        )?);
        Ok(())
    }

    pub fn adapter(&self) -> Option<&LoraAdapter> {
        self.lora.as_ref()
    }

    pub fn num_base_parameters(&self) -> usize {
        self.base.weight().elem_count() + self.base.bias().map(|b| b.elem_count()).unwrap_or(0)
    }

    pub fn forward_t(&self, xs: &Tensor, train: bool) -> Result<Tensor> {
        let out = self.base.forward(xs)?;
        match &self.lora {
            Some(lora) => {
                let delta = lora.delta(xs, train)?.to_dtype(out.dtype())?;
                Ok((out + delta)?)
            }
            None => Ok(out),
        }
    }
}
