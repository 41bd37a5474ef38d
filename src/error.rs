//! Error types for lorafit

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for lorafit operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The dataset path is empty or does not exist
    #[error("dataset_path not found: {}", .0.display())]
    DatasetNotFound(PathBuf),

    /// A dataset line could not be parsed
    #[error("Parse error at line {line}: {message}")]
    Parse {
        /// 1-based line number in the dataset file
        line: usize,
        /// Parser message
        message: String,
    },

    /// Tokenizer loading or encoding error
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    /// Model loading error
    #[error("Model loading error: {0}")]
    ModelLoading(String),

    /// Model hub fetch error
    #[error("Hub error: {0}")]
    Hub(String),

    /// Failure inside the fit loop
    #[error("Training error: {0}")]
    Training(String),

    /// Checkpoint save/load error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// The adapter weight file is absent after the save step
    #[error("{} not found after saving the adapter", .0.display())]
    MissingAdapter(PathBuf),

    /// Artifact export error
    #[error("Export error: {0}")]
    Export(String),

    /// Illegal pipeline stage transition
    #[error("Invalid stage transition: {from} -> {to}")]
    InvalidTransition {
        /// Stage the pipeline was in
        from: String,
        /// Stage that was requested
        to: String,
    },

    /// Tensor operation error
    #[error("Tensor operation error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for lorafit operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a parse error for a dataset line
    pub fn parse(line: usize, msg: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: msg.into(),
        }
    }

    /// Create a tokenizer error
    pub fn tokenizer(msg: impl Into<String>) -> Self {
        Self::Tokenizer(msg.into())
    }

    /// Create a model loading error
    pub fn model_loading(msg: impl Into<String>) -> Self {
        Self::ModelLoading(msg.into())
    }

    /// Create a hub error
    pub fn hub(msg: impl Into<String>) -> Self {
        Self::Hub(msg.into())
    }

    /// Create a training error
    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }

    /// Create an export error
    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export(msg.into())
    }

    /// Whether the error is a failed post-condition rather than a raised failure
    pub fn is_post_condition(&self) -> bool {
        matches!(self, Self::MissingAdapter(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_not_found_message() {
        let err = Error::DatasetNotFound(PathBuf::from("data/train.jsonl"));
        assert_eq!(err.to_string(), "dataset_path not found: data/train.jsonl");
    }

    #[test]
    fn test_parse_error_carries_line() {
        let err = Error::parse(3, "expected value");
        assert!(matches!(err, Error::Parse { line: 3, .. }));
        assert!(err.to_string().contains("line 3"));
    }

    #[test]
    fn test_post_condition_classification() {
        assert!(Error::MissingAdapter(PathBuf::from("x")).is_post_condition());
        assert!(!Error::training("boom").is_post_condition());
    }
}
