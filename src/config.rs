//! Run configuration
//!
//! A run is configured from command-line values with an optional structured
//! file layered on top; values present in the file win. The merged
//! [`RunConfiguration`] is built once and never mutated afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::training::dataset::MIN_MAX_LENGTH;

/// Default base model when none is given
pub const DEFAULT_BASE_MODEL: &str = "meta-llama/Llama-3.2-1B-Instruct";

/// Name of the checkpoint directory under the output directory
pub const CHECKPOINT_DIR_NAME: &str = "hf_out";

/// What to do with checkpoints left by a previous invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResumePolicy {
    /// Resume from the latest checkpoint when one exists
    #[default]
    Auto,
    /// Always start from step zero
    Never,
    /// Require a checkpoint to resume from
    Force,
}

impl FromStr for ResumePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "never" => Ok(Self::Never),
            "force" => Ok(Self::Force),
            other => Err(Error::config(format!(
                "invalid resume policy '{}', expected one of: auto, never, force",
                other
            ))),
        }
    }
}

impl fmt::Display for ResumePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Auto => "auto",
            Self::Never => "never",
            Self::Force => "force",
        };
        f.write_str(name)
    }
}

/// Values taken from the command line, defaults already applied
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLineValues {
    pub dataset_path: Option<PathBuf>,
    pub base_model: String,
    pub output_dir: PathBuf,
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub max_length: usize,
    pub resume: ResumePolicy,
}

impl Default for CommandLineValues {
    fn default() -> Self {
        Self {
            dataset_path: None,
            base_model: DEFAULT_BASE_MODEL.to_string(),
            output_dir: PathBuf::from("artifacts"),
            epochs: 3,
            learning_rate: 4e-4,
            batch_size: 1,
            max_length: 512,
            resume: ResumePolicy::Auto,
        }
    }
}

/// Recognized keys of the optional configuration file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub dataset_path: Option<String>,
    pub base_model: Option<String>,
    pub epochs: Option<usize>,
    pub learning_rate: Option<f64>,
    pub output_dir: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub bsz: Option<usize>,
    pub max_length: Option<usize>,
    pub resume: Option<ResumePolicy>,
    /// Extra model aliases for this run
    pub model_aliases: BTreeMap<String, String>,
    /// System preamble written into the serving manifest
    pub system_prompt: Option<String>,
}

impl FileConfig {
    /// Load a configuration file; the format follows the extension and
    /// defaults to YAML
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);

        match extension.as_deref() {
            Some("json") => Self::from_json_str(&content),
            Some("toml") => toml::from_str(&content)
                .map_err(|e| Error::config(format!("Invalid TOML in {}: {}", path.display(), e))),
            _ => Self::from_yaml_str(&content),
        }
    }

    /// Parse YAML content; an empty document is an empty configuration
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let value: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| Error::config(format!("Invalid YAML config: {}", e)))?;
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(value).map_err(|e| Error::config(format!("Invalid YAML config: {}", e)))
    }

    /// Parse JSON content
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| Error::config(format!("Invalid JSON config: {}", e)))
    }
}

/// Immutable configuration of one training run
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfiguration {
    /// JSONL dataset; empty when none was supplied
    pub dataset_path: PathBuf,
    /// Base model exactly as supplied (trimmed), before alias resolution
    pub base_model: String,
    pub output_dir: PathBuf,
    pub epochs: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub max_length: usize,
    pub resume: ResumePolicy,
    pub model_aliases: BTreeMap<String, String>,
    pub system_prompt: Option<String>,
}

impl RunConfiguration {
    /// Merge the file configuration over command-line values and validate
    pub fn resolve(cli: CommandLineValues, file: Option<FileConfig>) -> Result<Self> {
        let file = file.unwrap_or_default();

        // Empty strings in the file fall back to the command line
        let dataset_path = non_empty(file.dataset_path)
            .map(PathBuf::from)
            .or(cli.dataset_path)
            .unwrap_or_default();
        let base_model = non_empty(file.base_model)
            .unwrap_or(cli.base_model)
            .trim()
            .to_string();

        let config = Self {
            dataset_path,
            base_model,
            output_dir: file.output_dir.unwrap_or(cli.output_dir),
            epochs: file.epochs.unwrap_or(cli.epochs),
            learning_rate: file.learning_rate.unwrap_or(cli.learning_rate),
            batch_size: file.batch_size.or(file.bsz).unwrap_or(cli.batch_size),
            max_length: file.max_length.unwrap_or(cli.max_length),
            resume: file.resume.unwrap_or(cli.resume),
            model_aliases: file.model_aliases,
            system_prompt: non_empty(file.system_prompt),
        };
        config.validate()?;
        debug!("Resolved run configuration: {:?}", config);
        Ok(config)
    }

    /// Check numeric settings
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::config("epochs must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(Error::config("batch size must be greater than 0"));
        }
        if self.max_length < MIN_MAX_LENGTH {
            return Err(Error::config(format!(
                "max_length must be at least {}, got {}",
                MIN_MAX_LENGTH, self.max_length
            )));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(Error::config(format!(
                "learning rate must be a positive number, got {}",
                self.learning_rate
            )));
        }
        if self.output_dir.as_os_str().is_empty() {
            return Err(Error::config("output directory must not be empty"));
        }
        Ok(())
    }

    /// The dataset must name an existing file before any output is created
    pub fn validate_dataset(&self) -> Result<()> {
        if self.dataset_path.as_os_str().is_empty() || !self.dataset_path.is_file() {
            return Err(Error::DatasetNotFound(self.dataset_path.clone()));
        }
        Ok(())
    }

    /// Directory holding the per-epoch checkpoints
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.output_dir.join(CHECKPOINT_DIR_NAME)
    }

    /// Create the output and checkpoint directories
    pub fn prepare_output_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::create_dir_all(self.checkpoint_dir())?;
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
