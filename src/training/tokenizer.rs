//! Tokenizer abstraction used by the dataset builder
//!
//! The training pipeline only needs two things from a tokenizer: token ids
//! for a piece of text (special tokens included) and the id used for
//! padding. [`HfTokenizer`] provides both on top of a `tokenizer.json`.

use std::path::Path;

use tokenizers::Tokenizer;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Special tokens that serve as end-of-sequence markers in common chat models
const EOS_CANDIDATES: [&str; 6] = [
    "<|eot_id|>",
    "<|end_of_text|>",
    "<|im_end|>",
    "<|endoftext|>",
    "</s>",
    "<eos>",
];

/// Tokenizer trait for text encoding
#[cfg_attr(test, mockall::automock)]
pub trait TextTokenizer: Send + Sync {
    /// Encode text to token ids, adding the model's special tokens
    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Id written into padded positions
    fn pad_token_id(&self) -> u32;
}

/// Tokenizer backed by the `tokenizers` crate
pub struct HfTokenizer {
    inner: Tokenizer,
    pad_token_id: u32,
}

impl std::fmt::Debug for HfTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HfTokenizer")
            .field("vocab_size", &self.inner.get_vocab_size(true))
            .field("pad_token_id", &self.pad_token_id)
            .finish()
    }
}

impl HfTokenizer {
    /// Load from a `tokenizer.json`, optionally consulting the accompanying
    /// `tokenizer_config.json` for the pad and EOS tokens
    pub fn from_files(tokenizer_path: &Path, tokenizer_config: Option<&Path>) -> Result<Self> {
        let inner = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            Error::tokenizer(format!(
                "Failed to load tokenizer from {}: {}",
                tokenizer_path.display(),
                e
            ))
        })?;

        let declared = match tokenizer_config {
            Some(path) => SpecialTokens::read(path)?,
            None => SpecialTokens::default(),
        };

        Self::with_special_tokens(inner, &declared)
    }

    /// Wrap an already-loaded tokenizer
    pub fn from_tokenizer(inner: Tokenizer) -> Result<Self> {
        Self::with_special_tokens(inner, &SpecialTokens::default())
    }

    fn with_special_tokens(inner: Tokenizer, declared: &SpecialTokens) -> Result<Self> {
        let lookup = |token: &Option<String>| token.as_deref().and_then(|t| inner.token_to_id(t));

        let pad_token_id = if let Some(id) = lookup(&declared.pad_token) {
            id
        } else if let Some(padding) = inner.get_padding() {
            padding.pad_id
        } else if let Some(id) = lookup(&declared.eos_token) {
            debug!("Tokenizer has no pad token, using EOS id {}", id);
            id
        } else if let Some(id) = EOS_CANDIDATES.iter().find_map(|t| inner.token_to_id(t)) {
            debug!("Tokenizer has no pad token, using EOS id {}", id);
            id
        } else {
            return Err(Error::tokenizer(
                "tokenizer defines neither a pad token nor an end-of-sequence token",
            ));
        };

        Ok(Self {
            inner,
            pad_token_id,
        })
    }

    /// Vocabulary size including added tokens
    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }
}

impl TextTokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, true)
            .map_err(|e| Error::tokenizer(format!("Encoding failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }
}

/// Special tokens declared in `tokenizer_config.json`
#[derive(Debug, Default)]
struct SpecialTokens {
    pad_token: Option<String>,
    eos_token: Option<String>,
}

impl SpecialTokens {
    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let value: serde_json::Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => {
                warn!("Ignoring unreadable {}: {}", path.display(), e);
                return Ok(Self::default());
            }
        };

        // Either a plain string or an AddedToken object with `content`
        let token = |key: &str| match value.get(key) {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            Some(serde_json::Value::Object(obj)) => obj
                .get("content")
                .and_then(|c| c.as_str())
                .map(str::to_string),
            _ => None,
        };

        Ok(Self {
            pad_token: token("pad_token"),
            eos_token: token("eos_token"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;
    use tokenizers::models::wordlevel::WordLevel;
    use tokenizers::pre_tokenizers::whitespace::Whitespace;

    fn word_level(tokens: &[&str]) -> Tokenizer {
        let vocab: HashMap<String, u32> = tokens
            .iter()
            .enumerate()
            .map(|(i, t)| (t.to_string(), i as u32))
            .collect();
        let model = WordLevel::builder()
            .vocab(vocab.into_iter().collect())
            .unk_token("<unk>".to_string())
            .build()
            .unwrap();
        let mut tokenizer = Tokenizer::new(model);
        tokenizer.with_pre_tokenizer(Some(Whitespace {}));
        tokenizer
    }

    #[test]
    fn test_eos_used_as_pad() {
        let tokenizer = HfTokenizer::from_tokenizer(word_level(&["<unk>", "hello", "</s>"])).unwrap();
        assert_eq!(tokenizer.pad_token_id(), 2);
        assert_eq!(tokenizer.encode("hello hello").unwrap(), vec![1, 1]);
    }

    #[test]
    fn test_declared_tokens_take_precedence() {
        let dir = TempDir::new().unwrap();
        let tokenizer_path = dir.path().join("tokenizer.json");
        word_level(&["<unk>", "<pad>", "<end>", "</s>"])
            .save(&tokenizer_path, false)
            .unwrap();

        let config_path = dir.path().join("tokenizer_config.json");
        std::fs::write(&config_path, r#"{"eos_token": {"content": "<end>"}}"#).unwrap();
        let tokenizer = HfTokenizer::from_files(&tokenizer_path, Some(&config_path)).unwrap();
        assert_eq!(tokenizer.pad_token_id(), 2);

        std::fs::write(&config_path, r#"{"pad_token": "<pad>", "eos_token": "<end>"}"#).unwrap();
        let tokenizer = HfTokenizer::from_files(&tokenizer_path, Some(&config_path)).unwrap();
        assert_eq!(tokenizer.pad_token_id(), 1);
    }

    #[test]
    fn test_no_pad_or_eos_is_error() {
        let err = HfTokenizer::from_tokenizer(word_level(&["<unk>", "hello"])).unwrap_err();
        assert!(matches!(err, Error::Tokenizer(_)));
    }

    #[test]
    fn test_missing_file_is_tokenizer_error() {
        let err = HfTokenizer::from_files(Path::new("/no/such/tokenizer.json"), None).unwrap_err();
        assert!(matches!(err, Error::Tokenizer(_)));
    }
}
