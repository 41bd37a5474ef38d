//! Training controller
//!
//! Drives one fine-tuning run through its stages: tokenizer, dataset, base
//! model, adapters, then the fit loop. Checkpoints are written at the end of
//! every epoch and a run interrupted at any point picks up from the most
//! advanced checkpoint on the next invocation.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::backend::{ModelBackend, TrainableModel};
use super::checkpoints::{
    checkpoint_name, CheckpointLocator, CheckpointRetention, LogRecord, TrainerState,
    DEFAULT_SAVE_TOTAL_LIMIT,
};
use super::dataset::{DatasetBuilder, TokenizedDataset};
use super::optimizers::LinearScheduler;
use super::state::{PipelineStage, StageTracker};
use crate::config::{ResumePolicy, RunConfiguration};
use crate::error::{Error, Result};
use crate::lora::LoraConfig;
use crate::runtime::{ExecutionContext, Precision};

/// Fit-loop settings
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingArguments {
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub gradient_accumulation_steps: usize,
    pub warmup_steps: usize,
    /// Checkpoints kept on disk; `None` keeps all
    pub save_total_limit: Option<usize>,
    pub logging_steps: usize,
    pub seed: u64,
    /// Global gradient norm cap; `None` disables clipping
    pub max_grad_norm: Option<f64>,
    pub precision: Precision,
    pub resume: ResumePolicy,
}

impl Default for TrainingArguments {
    fn default() -> Self {
        Self {
            batch_size: 1,
            epochs: 3,
            learning_rate: 4e-4,
            gradient_accumulation_steps: 1,
            warmup_steps: 0,
            save_total_limit: Some(DEFAULT_SAVE_TOTAL_LIMIT),
            logging_steps: 5,
            seed: 42,
            max_grad_norm: Some(1.0),
            precision: Precision::Fp32,
            resume: ResumePolicy::Auto,
        }
    }
}

impl TrainingArguments {
    /// Arguments for a run; precision follows the execution context
    pub fn from_run(config: &RunConfiguration, ctx: &ExecutionContext) -> Self {
        Self {
            batch_size: config.batch_size,
            epochs: config.epochs,
            learning_rate: config.learning_rate,
            precision: ctx.precision(),
            resume: config.resume,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::config("batch size must be greater than 0"));
        }
        if self.epochs == 0 {
            return Err(Error::config("epochs must be greater than 0"));
        }
        if self.gradient_accumulation_steps == 0 {
            return Err(Error::config("gradient_accumulation_steps must be greater than 0"));
        }
        if self.logging_steps == 0 {
            return Err(Error::config("logging_steps must be greater than 0"));
        }
        Ok(())
    }
}

/// Progress notifications published while a run is in flight
#[derive(Debug, Clone, PartialEq)]
pub enum TrainingEvent {
    StageEntered { stage: PipelineStage },
    Resumed { checkpoint: PathBuf, global_step: usize },
    EpochStarted { epoch: usize, total_epochs: usize },
    StepLogged(LogRecord),
    CheckpointSaved { path: PathBuf },
    TrainingCompleted { global_step: usize },
}

/// Result of a finished run
pub struct TrainingOutcome {
    pub model: Box<dyn TrainableModel>,
    pub global_step: usize,
    pub resumed_from: Option<PathBuf>,
    pub log_history: Vec<LogRecord>,
}

impl std::fmt::Debug for TrainingOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingOutcome")
            .field("global_step", &self.global_step)
            .field("resumed_from", &self.resumed_from)
            .field("log_history", &self.log_history.len())
            .finish()
    }
}

/// Step bookkeeping derived from dataset size and arguments
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StepPlan {
    batches_per_epoch: usize,
    steps_per_epoch: usize,
    max_steps: usize,
}

impl StepPlan {
    fn new(num_examples: usize, args: &TrainingArguments) -> Self {
        let batches_per_epoch = num_examples.div_ceil(args.batch_size);
        let steps_per_epoch = batches_per_epoch.div_ceil(args.gradient_accumulation_steps);
        Self {
            batches_per_epoch,
            steps_per_epoch,
            max_steps: steps_per_epoch * args.epochs,
        }
    }

    /// Epoch index and steps already taken inside it
    fn position(&self, global_step: usize) -> (usize, usize) {
        if self.steps_per_epoch == 0 {
            return (0, 0);
        }
        (
            global_step / self.steps_per_epoch,
            global_step % self.steps_per_epoch,
        )
    }

    fn fractional_epoch(&self, global_step: usize) -> f64 {
        if self.steps_per_epoch == 0 {
            return 0.0;
        }
        global_step as f64 / self.steps_per_epoch as f64
    }
}

/// Owns the stage state machine and the fit loop of one run
pub struct TrainingController<'a> {
    backend: &'a dyn ModelBackend,
    ctx: &'a ExecutionContext,
    args: TrainingArguments,
    adapter: LoraConfig,
    model_id: String,
    dataset_path: PathBuf,
    max_length: usize,
    locator: CheckpointLocator,
    retention: CheckpointRetention,
    tracker: StageTracker,
    events: Option<mpsc::UnboundedSender<TrainingEvent>>,
}

impl<'a> TrainingController<'a> {
    /// Controller for `config`, training `model_id` (already resolved)
    pub fn new(
        backend: &'a dyn ModelBackend,
        ctx: &'a ExecutionContext,
        config: &RunConfiguration,
        model_id: impl Into<String>,
    ) -> Self {
        let args = TrainingArguments::from_run(config, ctx);
        Self {
            backend,
            ctx,
            retention: CheckpointRetention::new(args.save_total_limit),
            args,
            adapter: LoraConfig::default(),
            model_id: model_id.into(),
            dataset_path: config.dataset_path.clone(),
            max_length: config.max_length,
            locator: CheckpointLocator::new(config.checkpoint_dir()),
            tracker: StageTracker::new(),
            events: None,
        }
    }

    /// Replace the fit-loop arguments
    pub fn with_arguments(mut self, args: TrainingArguments) -> Self {
        self.retention = CheckpointRetention::new(args.save_total_limit);
        self.args = args;
        self
    }

    /// Replace the adapter settings
    pub fn with_adapter(mut self, adapter: LoraConfig) -> Self {
        self.adapter = adapter;
        self
    }

    /// Publish [`TrainingEvent`]s on `sender`
    pub fn with_event_monitoring(mut self, sender: mpsc::UnboundedSender<TrainingEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    pub fn stage(&self) -> PipelineStage {
        self.tracker.stage()
    }

    pub fn arguments(&self) -> &TrainingArguments {
        &self.args
    }

    fn send_event(&self, event: TrainingEvent) {
        if let Some(tx) = &self.events {
            // The receiver going away only silences progress reporting
            let _ = tx.send(event);
        }
    }

    fn enter<T>(&mut self, stage: PipelineStage, work: impl FnOnce() -> Result<T>) -> Result<T> {
        self.send_event(TrainingEvent::StageEntered { stage });
        self.tracker.enter(stage, work)
    }

    /// Run all stages; any error leaves the controller in `Failed`
    pub fn run(&mut self) -> Result<TrainingOutcome> {
        match self.run_stages() {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.tracker.fail(&e);
                Err(e)
            }
        }
    }

    fn run_stages(&mut self) -> Result<TrainingOutcome> {
        self.args.validate()?;
        self.adapter.validate()?;
        let resume_from = self.plan_resume()?;

        let backend = self.backend;
        let ctx = self.ctx;
        let model_id = self.model_id.clone();

        let tokenizer = self.enter(PipelineStage::TokenizerLoaded, || {
            backend.load_tokenizer(&model_id, ctx)
        })?;

        let dataset_path = self.dataset_path.clone();
        let max_length = self.max_length;
        let dataset = self.enter(PipelineStage::DatasetReady, || {
            DatasetBuilder::new(tokenizer.as_ref(), max_length)?.build(&dataset_path)
        })?;
        if dataset.is_empty() {
            return Err(Error::training(format!(
                "training set is empty: {} has no records",
                dataset_path.display()
            )));
        }

        let base = self.enter(PipelineStage::ModelLoaded, || backend.load_model(&model_id, ctx))?;

        let adapter = self.adapter.clone();
        let model = self.enter(PipelineStage::AdapterApplied, || base.apply_adapter(&adapter))?;
        info!("{}", model.parameter_counts());

        if self.args.resume == ResumePolicy::Never {
            self.clear_stale_checkpoints()?;
        }

        self.send_event(TrainingEvent::StageEntered {
            stage: PipelineStage::Training,
        });
        self.tracker.advance(PipelineStage::Training)?;
        let outcome = self.fit(model, &dataset, resume_from)?;

        self.tracker.advance(PipelineStage::Complete)?;
        self.send_event(TrainingEvent::TrainingCompleted {
            global_step: outcome.global_step,
        });
        Ok(outcome)
    }

    /// Decide where training starts according to the resume policy.
    /// Nothing on disk changes here.
    fn plan_resume(&self) -> Result<Option<PathBuf>> {
        match self.args.resume {
            ResumePolicy::Auto => self.locator.latest(),
            ResumePolicy::Never => Ok(None),
            ResumePolicy::Force => match self.locator.latest()? {
                Some(path) => Ok(Some(path)),
                None => Err(Error::config(format!(
                    "resume policy 'force' requires a checkpoint under {}",
                    self.locator.root().display()
                ))),
            },
        }
    }

    /// Under the 'never' policy old checkpoints go only once the model is
    /// ready to train, so a failed load keeps them
    fn clear_stale_checkpoints(&self) -> Result<()> {
        let removed = CheckpointRetention::clear(&self.locator)?;
        if !removed.is_empty() {
            info!(
                "[resume] policy 'never': removed {} stale checkpoint(s)",
                removed.len()
            );
        }
        Ok(())
    }

    fn restore(
        &self,
        model: &mut dyn TrainableModel,
        checkpoint: &Path,
    ) -> Result<(usize, Vec<LogRecord>)> {
        info!("[resume] Found checkpoint: {}", checkpoint.display());
        model.load_checkpoint(checkpoint)?;

        let (global_step, log_history) = match TrainerState::load_or_infer(checkpoint)? {
            Some(state) => {
                if state.train_batch_size != self.args.batch_size {
                    warn!(
                        "Checkpoint was trained with batch size {}, continuing with {}",
                        state.train_batch_size, self.args.batch_size
                    );
                }
                (state.global_step, state.log_history)
            }
            None => {
                let step = TrainerState::step_from_dir_name(checkpoint).ok_or_else(|| {
                    Error::checkpoint(format!(
                        "cannot determine the step of {}",
                        checkpoint.display()
                    ))
                })?;
                (step, Vec::new())
            }
        };

        self.send_event(TrainingEvent::Resumed {
            checkpoint: checkpoint.to_path_buf(),
            global_step,
        });
        Ok((global_step, log_history))
    }

    fn fit(
        &self,
        mut model: Box<dyn TrainableModel>,
        dataset: &TokenizedDataset,
        resume_from: Option<PathBuf>,
    ) -> Result<TrainingOutcome> {
        let args = &self.args;
        let plan = StepPlan::new(dataset.len(), args);
        let scheduler = LinearScheduler::new(args.learning_rate, plan.max_steps, args.warmup_steps);

        let (mut global_step, mut log_history) = match &resume_from {
            Some(checkpoint) => self.restore(model.as_mut(), checkpoint)?,
            None => (0, Vec::new()),
        };

        let (start_epoch, skip_steps) = plan.position(global_step);
        info!(
            "Training: {} examples, {} epochs, batch size {}, {} steps per epoch, {} total steps, precision {:?}",
            dataset.len(),
            args.epochs,
            args.batch_size,
            plan.steps_per_epoch,
            plan.max_steps,
            args.precision
        );
        if global_step >= plan.max_steps {
            info!("[resume] Checkpoint already covers all {} steps", plan.max_steps);
        }

        let mut running_loss = 0.0;
        let mut running_count = 0usize;

        for epoch in start_epoch..args.epochs {
            self.send_event(TrainingEvent::EpochStarted {
                epoch: epoch + 1,
                total_epochs: args.epochs,
            });
            debug!("Epoch {}/{}", epoch + 1, args.epochs);

            let mut order: Vec<usize> = (0..dataset.len()).collect();
            let mut rng = StdRng::seed_from_u64(args.seed + epoch as u64);
            order.shuffle(&mut rng);

            let batches = dataset.batches(&order, args.batch_size)?;
            debug_assert_eq!(batches.len(), plan.batches_per_epoch);
            let skip = if epoch == start_epoch { skip_steps } else { 0 };
            if skip > 0 {
                info!("[resume] Skipping {} completed step(s) of epoch {}", skip, epoch + 1);
            }

            for group in batches.chunks(args.gradient_accumulation_steps).skip(skip) {
                let scale = 1.0 / group.len() as f64;
                let mut step_loss = 0.0;
                for batch in group {
                    step_loss += model.accumulate(batch, scale)? * scale;
                }
                if !step_loss.is_finite() {
                    warn!("Non-finite loss at step {}", global_step + 1);
                }

                let learning_rate = scheduler.lr_at(global_step);
                model.apply_update(learning_rate, args.max_grad_norm)?;
                global_step += 1;
                running_loss += step_loss;
                running_count += 1;

                if global_step % args.logging_steps == 0 {
                    let record = LogRecord {
                        step: global_step,
                        epoch: plan.fractional_epoch(global_step),
                        loss: running_loss / running_count as f64,
                        learning_rate,
                    };
                    info!(
                        "{{'loss': {:.4}, 'learning_rate': {:.3e}, 'epoch': {:.2}}}",
                        record.loss, record.learning_rate, record.epoch
                    );
                    self.send_event(TrainingEvent::StepLogged(record.clone()));
                    log_history.push(record);
                    running_loss = 0.0;
                    running_count = 0;
                }
            }

            let state = TrainerState {
                global_step,
                epoch: plan.fractional_epoch(global_step),
                max_steps: plan.max_steps,
                num_train_epochs: args.epochs,
                train_batch_size: args.batch_size,
                steps_per_epoch: plan.steps_per_epoch,
                logging_steps: args.logging_steps,
                seed: args.seed,
                log_history: log_history.clone(),
                saved_at: Utc::now(),
            };
            self.save_checkpoint(model.as_ref(), &state)?;
        }

        Ok(TrainingOutcome {
            model,
            global_step,
            resumed_from: resume_from,
            log_history,
        })
    }

    fn save_checkpoint(&self, model: &dyn TrainableModel, state: &TrainerState) -> Result<PathBuf> {
        let dir = self.locator.root().join(checkpoint_name(state.global_step));
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::checkpoint(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        model.save_checkpoint(&dir)?;
        state.save(&dir)?;
        info!("Saving model checkpoint to {}", dir.display());
        self.send_event(TrainingEvent::CheckpointSaved { path: dir.clone() });

        self.retention.prune(&self.locator)?;
        Ok(dir)
    }
}
