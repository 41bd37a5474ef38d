//! End-to-end run sequencing
//!
//! Resolve the model, validate the dataset, prepare the output directory,
//! train (resuming when a checkpoint allows it) and export the serving
//! artifacts. The blocking pipeline runs on tokio's blocking pool while the
//! async side reports progress and prints a heartbeat.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lorafit::training::LogRecord;
use lorafit::{
    ExecutionContext, ModelAliases, ModelBackend, ResolvedModel, Result, RunConfiguration,
    TrainingController, TrainingEvent,
};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::cli::{CliError, CliResult, MarkerLocation, TrainArgs};
use crate::export::{ArtifactExporter, ExportReport};

/// Default spacing of heartbeat lines
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(60);

const BANNER_WIDTH: usize = 53;

/// What a successful run produced
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub model: ResolvedModel,
    pub global_step: usize,
    pub resumed_from: Option<PathBuf>,
    pub final_record: Option<LogRecord>,
    pub export: ExportReport,
}

/// Sequences one training run over an injectable model backend
pub struct Orchestrator {
    backend: Arc<dyn ModelBackend>,
    heartbeat: Option<Duration>,
    context: Option<ExecutionContext>,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self {
            backend,
            heartbeat: Some(DEFAULT_HEARTBEAT),
            context: None,
        }
    }

    /// `None` disables the heartbeat
    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat = interval.filter(|d| !d.is_zero());
        self
    }

    /// Use a fixed execution context instead of detecting one
    pub fn with_context(mut self, ctx: ExecutionContext) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Top-level handler: resolve the configuration from `args`, run, and
    /// on any failure append the error to the marker file before returning it
    pub async fn execute(
        &self,
        args: &TrainArgs,
        marker: &MarkerLocation,
    ) -> CliResult<RunSummary> {
        let result = match args.run_configuration() {
            Ok(config) => self.run(config).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            error!("[ERROR] {}", e);
            marker.record(&e.marker_line());
        }
        result
    }

    /// Run the pipeline for an already resolved configuration
    pub async fn run(&self, config: RunConfiguration) -> CliResult<RunSummary> {
        let aliases = ModelAliases::builtin().with_overrides(config.model_aliases.iter());
        let model = aliases.resolve(&config.base_model);

        // Nothing is created on disk until the dataset is known to exist
        config.validate_dataset()?;
        config.prepare_output_dirs()?;
        log_banner(&config, &model);

        let ctx = match &self.context {
            Some(ctx) => ctx.clone(),
            None => ExecutionContext::detect()?,
        };

        let output_dir = config.output_dir.clone();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let backend = Arc::clone(&self.backend);
        let exporter = ArtifactExporter::from_run(&config);
        let pipeline_model = model.clone();

        let mut task = tokio::task::spawn_blocking(move || -> Result<RunSummary> {
            ctx.install(|| {
                let mut controller = TrainingController::new(
                    backend.as_ref(),
                    &ctx,
                    &config,
                    pipeline_model.id.clone(),
                )
                .with_event_monitoring(tx);
                let outcome = controller.run()?;
                // Closes the event channel before the export starts
                drop(controller);

                let export = exporter.export(outcome.model.as_ref(), &pipeline_model, &aliases)?;
                Ok(RunSummary {
                    model: pipeline_model.clone(),
                    global_step: outcome.global_step,
                    resumed_from: outcome.resumed_from,
                    final_record: outcome.log_history.last().cloned(),
                    export,
                })
            })
        });

        let mut heartbeat = self.heartbeat.map(|every| {
            let mut interval = tokio::time::interval_at(Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut progress = ProgressReporter::default();

        let joined = loop {
            tokio::select! {
                joined = &mut task => break joined,
                Some(event) = rx.recv() => progress.report(event),
                _ = tick(&mut heartbeat) => info!("[heartbeat] still running..."),
            }
        };
        while let Ok(event) = rx.try_recv() {
            progress.report(event);
        }

        let summary = joined.map_err(|e| CliError::TaskAborted(e.to_string()))??;
        info!("[OK] Artifacts ready in: {}", output_dir.display());
        Ok(summary)
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn log_banner(config: &RunConfiguration, model: &ResolvedModel) {
    let rule = "=".repeat(BANNER_WIDTH);
    info!("{}", rule);
    info!("[lorafit] LoRA fine-tune - {}", lorafit::VERSION);
    info!(" dataset_path : {}", config.dataset_path.display());
    info!(" base_model   : {}", model.id);
    info!(" epochs       : {}", config.epochs);
    info!(" learning_rate: {}", config.learning_rate);
    info!(" batch_size   : {}", config.batch_size);
    info!(" max_length   : {}", config.max_length);
    info!(" output_dir   : {}", config.output_dir.display());
    info!(" resume       : {}", config.resume);
    info!("{}", rule);
}

/// Turns training events into operator-facing log lines
#[derive(Debug, Default)]
struct ProgressReporter {
    events: usize,
    last_record: Option<LogRecord>,
}

impl ProgressReporter {
    fn report(&mut self, event: TrainingEvent) {
        self.events += 1;
        match event {
            TrainingEvent::StageEntered { stage } => debug!("Entering stage: {}", stage),
            TrainingEvent::Resumed {
                checkpoint,
                global_step,
            } => info!(
                "[resume] Continuing from {} at step {}",
                checkpoint.display(),
                global_step
            ),
            TrainingEvent::EpochStarted {
                epoch,
                total_epochs,
            } => info!("Epoch {}/{}", epoch, total_epochs),
            TrainingEvent::StepLogged(record) => {
                debug!("step {} loss {:.4}", record.step, record.loss);
                self.last_record = Some(record);
            }
            TrainingEvent::CheckpointSaved { path } => {
                debug!("Checkpoint saved: {}", path.display())
            }
            TrainingEvent::TrainingCompleted { global_step } => match &self.last_record {
                Some(record) => info!(
                    "Training completed after {} steps (last loss {:.4})",
                    global_step, record.loss
                ),
                None => info!("Training completed after {} steps", global_step),
            },
        }
    }
}
