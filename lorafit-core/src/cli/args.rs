use clap::Parser;
use lorafit::config::DEFAULT_BASE_MODEL;
use lorafit::{CommandLineValues, FileConfig, ResumePolicy, RunConfiguration};
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::error::CliResult;

/// Command-line flags of the `lorafit` binary
#[derive(Parser, Debug, Clone)]
#[command(
    name = "lorafit",
    version,
    about = "LoRA fine-tune a causal language model and package it for Ollama",
    long_about = "Fine-tunes a low-rank adapter on a JSONL prompt/response dataset, resuming \
                  from the latest checkpoint when one exists, and writes an adapter plus a \
                  Modelfile ready for the serving runtime."
)]
pub struct TrainArgs {
    /// Optional YAML, JSON or TOML file; its values win over flags
    #[arg(long, env = "LORAFIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// JSONL dataset with `prompt` and `response` fields
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Base model repository id or short alias
    #[arg(long, default_value = DEFAULT_BASE_MODEL)]
    pub base: String,

    /// Output directory for the adapter, Modelfile and checkpoints
    #[arg(long, default_value = "artifacts")]
    pub outdir: PathBuf,

    /// Number of training epochs
    #[arg(long, default_value_t = 3)]
    pub epochs: usize,

    /// Peak learning rate
    #[arg(long, default_value_t = 4e-4)]
    pub lr: f64,

    /// Per-device batch size
    #[arg(long, default_value_t = 1)]
    pub bsz: usize,

    /// Maximum sequence length in tokens
    #[arg(long = "max_length", default_value_t = 512)]
    pub max_length: usize,

    /// Checkpoint resume policy
    #[arg(long, default_value = "auto", value_parser = parse_resume)]
    pub resume: ResumePolicy,

    /// Set the verbosity level (can be repeated for more verbose output)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Silence all output except errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Use JSON output format
    #[arg(long)]
    pub json: bool,

    /// Seconds between heartbeat lines; 0 disables them
    #[arg(long = "heartbeat-secs", default_value_t = 60)]
    pub heartbeat_secs: u64,
}

fn parse_resume(value: &str) -> Result<ResumePolicy, String> {
    value.parse::<ResumePolicy>().map_err(|e| e.to_string())
}

impl TrainArgs {
    /// Flag values with defaults applied
    pub fn command_line_values(&self) -> CommandLineValues {
        CommandLineValues {
            dataset_path: self.data.clone(),
            base_model: self.base.clone(),
            output_dir: self.outdir.clone(),
            epochs: self.epochs,
            learning_rate: self.lr,
            batch_size: self.bsz,
            max_length: self.max_length,
            resume: self.resume,
        }
    }

    /// Layer the optional config file over the flags
    pub fn run_configuration(&self) -> CliResult<RunConfiguration> {
        let file = match &self.config {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Some(FileConfig::from_file(path)?)
            }
            None => None,
        };
        Ok(RunConfiguration::resolve(self.command_line_values(), file)?)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_secs > 0).then(|| Duration::from_secs(self.heartbeat_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Write;
    use test_case::test_case;

    #[test]
    fn test_defaults() {
        let args = TrainArgs::try_parse_from(["lorafit"]).unwrap();
        assert_eq!(args.base, DEFAULT_BASE_MODEL);
        assert_eq!(args.outdir, PathBuf::from("artifacts"));
        assert_eq!(args.epochs, 3);
        assert_relative_eq!(args.lr, 4e-4);
        assert_eq!(args.bsz, 1);
        assert_eq!(args.max_length, 512);
        assert_eq!(args.resume, ResumePolicy::Auto);
        assert_eq!(args.heartbeat_interval(), Some(Duration::from_secs(60)));
        assert_eq!(args.command_line_values().dataset_path, None);
    }

    #[test]
    fn test_flags() {
        let args = TrainArgs::try_parse_from([
            "lorafit",
            "--data",
            "train.jsonl",
            "--base",
            "qwen2.5:0.5b",
            "--outdir=out",
            "--epochs",
            "1",
            "--lr",
            "1e-3",
            "--bsz",
            "4",
            "--max_length",
            "128",
            "--heartbeat-secs",
            "0",
            "-vv",
        ])
        .unwrap();
        let values = args.command_line_values();
        assert_eq!(values.dataset_path, Some(PathBuf::from("train.jsonl")));
        assert_eq!(values.base_model, "qwen2.5:0.5b");
        assert_eq!(values.output_dir, PathBuf::from("out"));
        assert_eq!(values.batch_size, 4);
        assert_eq!(values.max_length, 128);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.heartbeat_interval(), None);
    }

    #[test_case("auto", ResumePolicy::Auto)]
    #[test_case("never", ResumePolicy::Never)]
    #[test_case("FORCE", ResumePolicy::Force)]
    fn test_resume_values(raw: &str, expected: ResumePolicy) {
        let args = TrainArgs::try_parse_from(["lorafit", "--resume", raw]).unwrap();
        assert_eq!(args.resume, expected);
    }

    #[test]
    fn test_invalid_resume_is_usage_error() {
        let err = TrainArgs::try_parse_from(["lorafit", "--resume", "sometimes"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(TrainArgs::try_parse_from(["lorafit", "-q", "-v"]).is_err());
    }

    #[test]
    fn test_config_file_wins() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "epochs: 7\nbsz: 2\nbase_model: ''").unwrap();

        let args = TrainArgs::try_parse_from([
            "lorafit",
            "--epochs",
            "1",
            "--config",
            file.path().to_str().unwrap(),
        ])
        .unwrap();
        let config = args.run_configuration().unwrap();
        assert_eq!(config.epochs, 7);
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.base_model, DEFAULT_BASE_MODEL);
    }

    #[test]
    fn test_missing_config_file_is_error() {
        let args =
            TrainArgs::try_parse_from(["lorafit", "--config", "/nonexistent/lorafit.yaml"]).unwrap();
        assert!(args.run_configuration().is_err());
    }
}
