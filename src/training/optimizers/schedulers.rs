//! Learning rate schedulers

use serde::{Deserialize, Serialize};

/// Linear learning rate scheduler with optional warmup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearScheduler {
    /// Base learning rate
    base_lr: f64,
    /// Total training steps
    total_steps: usize,
    /// Warmup steps
    warmup_steps: usize,
}

impl LinearScheduler {
    /// Create a new linear scheduler
    pub fn new(base_lr: f64, total_steps: usize, warmup_steps: usize) -> Self {
        Self {
            base_lr,
            total_steps,
            warmup_steps: warmup_steps.min(total_steps),
        }
    }

    pub fn base_lr(&self) -> f64 {
        self.base_lr
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    /// Learning rate used for the update that follows `step` completed ones
    pub fn lr_at(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            // Linear warmup
            return self.base_lr * step as f64 / self.warmup_steps.max(1) as f64;
        }
        // Linear decay to zero
        let decay_steps = self.total_steps.saturating_sub(self.warmup_steps);
        if decay_steps == 0 {
            return 0.0;
        }
        let remaining = self.total_steps.saturating_sub(step) as f64;
        self.base_lr * (remaining / decay_steps as f64).max(0.0)
    }
}
