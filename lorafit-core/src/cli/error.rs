use colored::*;
use lorafit::Error;
use thiserror::Error;

pub type CliResult<T> = Result<T, CliError>;

/// Failures surfaced by the `lorafit` binary
#[derive(Error, Debug)]
pub enum CliError {
    /// Anything the training library reports
    #[error(transparent)]
    Run(#[from] Error),

    /// The blocking pipeline task panicked or was cancelled
    #[error("Training task aborted: {0}")]
    TaskAborted(String),
}

impl CliError {
    /// Process exit status for this failure. Usage errors never get here;
    /// clap exits with 2 on its own.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Run(_) | CliError::TaskAborted(_) => 1,
        }
    }

    /// The library error behind this failure, if any
    pub fn run_error(&self) -> Option<&Error> {
        match self {
            CliError::Run(e) => Some(e),
            _ => None,
        }
    }

    /// Single-line rendering for the error marker file
    pub fn marker_line(&self) -> String {
        self.to_string()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Print a user-friendly error message
    pub fn print_error(&self) {
        eprintln!("{} {}", "Error:".red().bold(), self);

        match self.run_error() {
            Some(Error::DatasetNotFound(_)) => {
                eprintln!(
                    "\n{} Pass an existing JSONL file with {} or set {} in the config file",
                    "Hint:".yellow(),
                    "--data".cyan(),
                    "dataset_path".cyan()
                );
            }
            Some(Error::Hub(_)) => {
                eprintln!(
                    "\n{} Gated repositories need {} (or {}) to be set",
                    "Hint:".yellow(),
                    "HUGGINGFACE_HUB_TOKEN".cyan(),
                    "HF_TOKEN".cyan()
                );
            }
            Some(Error::Config(msg)) if msg.contains("requires a checkpoint") => {
                eprintln!(
                    "\n{} Use {} to start from scratch",
                    "Hint:".yellow(),
                    "--resume auto".cyan()
                );
            }
            _ => {}
        }
    }
}
