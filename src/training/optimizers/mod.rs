//! Optimizers and learning rate schedulers

pub mod adamw;
pub mod schedulers;

pub use adamw::{clip_grad_norm, AdamW, AdamWConfig};
pub use schedulers::LinearScheduler;
