//! Per-run execution context
//!
//! Everything that would otherwise be process-wide state (compute device,
//! numeric precision, CPU thread budget, hub credential) is gathered here once
//! per run and handed to the components that need it.

use std::sync::Arc;

use candle_core::{DType, Device};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Environment variables consulted for a hub access token, in order
pub const HUB_TOKEN_VARS: [&str; 2] = ["HUGGINGFACE_HUB_TOKEN", "HF_TOKEN"];

/// Numeric precision used for the frozen base weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// Full precision
    Fp32,
    /// Half precision, only on accelerators
    Fp16,
}

impl Precision {
    /// Candle dtype for this precision
    pub fn dtype(self) -> DType {
        match self {
            Self::Fp32 => DType::F32,
            Self::Fp16 => DType::F16,
        }
    }
}

/// Read the hub token from the environment
pub fn hub_token_from_env() -> Option<String> {
    HUB_TOKEN_VARS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|token| !token.trim().is_empty())
}

/// Scoped execution settings for one run
#[derive(Clone)]
pub struct ExecutionContext {
    device: Device,
    precision: Precision,
    thread_pool: Option<Arc<rayon::ThreadPool>>,
    hub_token: Option<String>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("device", &self.device)
            .field("precision", &self.precision)
            .field("threads", &self.intra_op_threads())
            .field("hub_token", &self.hub_token.as_ref().map(|_| "<set>"))
            .finish()
    }
}

impl ExecutionContext {
    /// Pick an accelerator when present, otherwise the CPU with a thread
    /// budget equal to the host core count
    pub fn detect() -> Result<Self> {
        let device = Device::cuda_if_available(0)?;
        let context = if device.is_cuda() {
            Self {
                device,
                precision: Precision::Fp16,
                thread_pool: None,
                hub_token: hub_token_from_env(),
            }
        } else {
            Self::cpu_with_threads(num_cpus::get()).with_hub_token(hub_token_from_env())
        };
        info!(
            "Execution context: device={:?}, precision={:?}, threads={}",
            context.device,
            context.precision,
            context.intra_op_threads()
        );
        Ok(context)
    }

    /// CPU context capped to `threads` intra-op threads
    pub fn cpu_with_threads(threads: usize) -> Self {
        let threads = threads.max(1);
        let thread_pool = match rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("lorafit-compute-{}", i))
            .build()
        {
            Ok(pool) => Some(Arc::new(pool)),
            Err(e) => {
                warn!("Could not build a {}-thread compute pool: {}", threads, e);
                None
            }
        };
        Self {
            device: Device::Cpu,
            precision: Precision::Fp32,
            thread_pool,
            hub_token: None,
        }
    }

    /// Plain CPU context without a dedicated pool
    pub fn cpu() -> Self {
        Self {
            device: Device::Cpu,
            precision: Precision::Fp32,
            thread_pool: None,
            hub_token: None,
        }
    }

    /// Attach a hub access token
    pub fn with_hub_token(mut self, token: Option<String>) -> Self {
        self.hub_token = token;
        self
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn hub_token(&self) -> Option<&str> {
        self.hub_token.as_deref()
    }

    /// Whether an accelerator backs this context
    pub fn is_accelerated(&self) -> bool {
        !self.device.is_cpu()
    }

    /// Threads available to numeric kernels inside [`Self::install`]
    pub fn intra_op_threads(&self) -> usize {
        self.thread_pool
            .as_ref()
            .map(|pool| pool.current_num_threads())
            .unwrap_or_else(rayon::current_num_threads)
    }

    /// Run `work` with this context's thread budget in effect
    pub fn install<R, F>(&self, work: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.thread_pool {
            Some(pool) => {
                debug!("Running inside scoped compute pool");
                pool.install(work)
            }
            None => work(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_context_is_full_precision() {
        let ctx = ExecutionContext::cpu();
        assert!(!ctx.is_accelerated());
        assert_eq!(ctx.precision(), Precision::Fp32);
        assert_eq!(ctx.precision().dtype(), DType::F32);
    }

    #[test]
    fn test_scoped_pool_caps_threads() {
        let ctx = ExecutionContext::cpu_with_threads(2);
        assert_eq!(ctx.intra_op_threads(), 2);
        let seen = ctx.install(rayon::current_num_threads);
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_zero_threads_clamped() {
        let ctx = ExecutionContext::cpu_with_threads(0);
        assert_eq!(ctx.intra_op_threads(), 1);
    }

    #[test]
    fn test_debug_hides_token() {
        let ctx = ExecutionContext::cpu().with_hub_token(Some("hf_secret".to_string()));
        assert_eq!(ctx.hub_token(), Some("hf_secret"));
        assert!(!format!("{:?}", ctx).contains("hf_secret"));
    }
}
