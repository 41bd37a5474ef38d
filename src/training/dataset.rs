//! JSONL instruction dataset
//!
//! Each non-blank line of the input is one JSON object with optional
//! `prompt` and `response` strings. Records are rendered into a single
//! `User: ...\nAssistant: ...` text, tokenized, truncated and right-padded
//! to a fixed length. Labels equal the input ids, so the whole text is the
//! causal-LM target.

use std::path::Path;

use rayon::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};

use super::backend::Batch;
use super::tokenizer::TextTokenizer;
use crate::error::{Error, Result};

/// One prompt/response pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainingExample {
    pub prompt: String,
    pub response: String,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    response: Option<String>,
}

impl TrainingExample {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
        }
    }

    /// Parse one JSONL line; `line_number` is 1-based and only used for errors
    pub fn from_json_line(line: &str, line_number: usize) -> Result<Self> {
        let record: RawRecord =
            serde_json::from_str(line).map_err(|e| Error::parse(line_number, e.to_string()))?;
        Ok(Self {
            prompt: record.prompt.unwrap_or_default(),
            response: record.response.unwrap_or_default(),
        })
    }

    /// Render the training text
    pub fn render(&self) -> String {
        format!(
            "User: {}\nAssistant: {}",
            self.prompt.trim(),
            self.response.trim()
        )
    }
}

/// A fixed-length tokenized example
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedExample {
    pub input_ids: Vec<u32>,
    pub attention_mask: Vec<u32>,
    pub labels: Vec<u32>,
}

impl TokenizedExample {
    /// Truncate or right-pad `ids` to exactly `max_length`
    pub fn from_ids(mut ids: Vec<u32>, max_length: usize, pad_token_id: u32) -> Self {
        ids.truncate(max_length);
        let real = ids.len();
        ids.resize(max_length, pad_token_id);

        let mut attention_mask = vec![1u32; real];
        attention_mask.resize(max_length, 0);

        Self {
            labels: ids.clone(),
            input_ids: ids,
            attention_mask,
        }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Number of non-padding tokens
    pub fn real_tokens(&self) -> usize {
        self.attention_mask.iter().filter(|&&m| m == 1).count()
    }
}

/// The tokenized training set
#[derive(Debug, Clone, Default)]
pub struct TokenizedDataset {
    examples: Vec<TokenizedExample>,
    max_length: usize,
}

impl TokenizedDataset {
    pub fn new(examples: Vec<TokenizedExample>, max_length: usize) -> Self {
        Self {
            examples,
            max_length,
        }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    pub fn get(&self, index: usize) -> Option<&TokenizedExample> {
        self.examples.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenizedExample> {
        self.examples.iter()
    }

    /// Number of batches per pass over the data
    pub fn num_batches(&self, batch_size: usize) -> usize {
        if batch_size == 0 {
            return 0;
        }
        self.examples.len().div_ceil(batch_size)
    }

    /// Group examples into batches following `order`; the last batch may be
    /// smaller
    pub fn batches(&self, order: &[usize], batch_size: usize) -> Result<Vec<Batch>> {
        if batch_size == 0 {
            return Err(Error::config("batch size must be greater than 0"));
        }
        order
            .chunks(batch_size)
            .map(|chunk| {
                let examples = chunk
                    .iter()
                    .map(|&i| {
                        self.examples.get(i).ok_or_else(|| {
                            Error::training(format!("example index {} out of range", i))
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Batch::from_examples(&examples))
            })
            .collect()
    }
}

/// Shortest usable sequence: a causal LM needs an input and a next token
pub const MIN_MAX_LENGTH: usize = 2;

/// Builds a [`TokenizedDataset`] from a JSONL file
pub struct DatasetBuilder<'a> {
    tokenizer: &'a dyn TextTokenizer,
    max_length: usize,
}

impl<'a> DatasetBuilder<'a> {
    pub fn new(tokenizer: &'a dyn TextTokenizer, max_length: usize) -> Result<Self> {
        if max_length < MIN_MAX_LENGTH {
            return Err(Error::config(format!(
                "max_length must be at least {}, got {}",
                MIN_MAX_LENGTH, max_length
            )));
        }
        Ok(Self {
            tokenizer,
            max_length,
        })
    }

    /// Parse every non-blank line; the first invalid line fails the read
    pub fn read_examples(path: &Path) -> Result<Vec<TrainingExample>> {
        if !path.is_file() {
            return Err(Error::DatasetNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::parse_examples(&content)
    }

    /// Parse JSONL content
    pub fn parse_examples(content: &str) -> Result<Vec<TrainingExample>> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| TrainingExample::from_json_line(line, index + 1))
            .collect()
    }

    /// Tokenize one example
    pub fn tokenize(&self, example: &TrainingExample) -> Result<TokenizedExample> {
        let ids = self.tokenizer.encode(&example.render())?;
        Ok(TokenizedExample::from_ids(
            ids,
            self.max_length,
            self.tokenizer.pad_token_id(),
        ))
    }

    /// Tokenize a batch of examples in parallel, preserving order
    pub fn tokenize_all(&self, examples: &[TrainingExample]) -> Result<TokenizedDataset> {
        let tokenized = examples
            .par_iter()
            .map(|example| self.tokenize(example))
            .collect::<Result<Vec<_>>>()?;
        Ok(TokenizedDataset::new(tokenized, self.max_length))
    }

    /// Read, render and tokenize the whole file
    pub fn build(&self, path: &Path) -> Result<TokenizedDataset> {
        let examples = Self::read_examples(path)?;
        debug!("Parsed {} records from {}", examples.len(), path.display());

        let dataset = self.tokenize_all(&examples)?;
        let truncated = dataset
            .iter()
            .filter(|e| e.real_tokens() == self.max_length)
            .count();
        info!(
            "Tokenized {} examples (max_length={}, {} at full length)",
            dataset.len(),
            self.max_length,
            truncated
        );
        Ok(dataset)
    }
}
