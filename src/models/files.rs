//! Locating model files on disk or on the Hugging Face hub

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use hf_hub::api::sync::ApiBuilder;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const CONFIG_FILE: &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";
pub const SINGLE_WEIGHTS_FILE: &str = "model.safetensors";
pub const WEIGHTS_INDEX_FILE: &str = "model.safetensors.index.json";

#[derive(Debug, Deserialize)]
struct WeightIndex {
    weight_map: std::collections::HashMap<String, String>,
}

/// Where a model's files come from
#[derive(Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A local directory laid out like a hub repository
    Local(PathBuf),
    /// A hub repository id
    Hub {
        repo_id: String,
        token: Option<String>,
    },
}

impl std::fmt::Debug for ModelSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(dir) => f.debug_tuple("Local").field(dir).finish(),
            Self::Hub { repo_id, token } => f
                .debug_struct("Hub")
                .field("repo_id", repo_id)
                .field("token", &token.as_ref().map(|_| "<set>"))
                .finish(),
        }
    }
}

impl ModelSource {
    /// Existing directories are read locally, anything else is a hub id
    pub fn new(model_id: &str, token: Option<&str>) -> Self {
        let local = Path::new(model_id);
        if local.is_dir() {
            Self::Local(local.to_path_buf())
        } else {
            Self::Hub {
                repo_id: model_id.to_string(),
                token: token.map(str::to_string),
            }
        }
    }

    fn fetch(&self, file: &str) -> Result<PathBuf> {
        match self {
            Self::Local(dir) => {
                let path = dir.join(file);
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(Error::model_loading(format!(
                        "{} not found in {}",
                        file,
                        dir.display()
                    )))
                }
            }
            Self::Hub { repo_id, token } => {
                let api = ApiBuilder::new()
                    .with_token(token.clone())
                    .build()
                    .map_err(|e| Error::hub(format!("Failed to initialize hub client: {}", e)))?;
                debug!("Fetching {} from {}", file, repo_id);
                api.model(repo_id.clone()).get(file).map_err(|e| {
                    let hint = if token.is_none() {
                        " (gated repositories need HUGGINGFACE_HUB_TOKEN or HF_TOKEN)"
                    } else {
                        ""
                    };
                    Error::hub(format!("Failed to fetch {} from {}: {}{}", file, repo_id, e, hint))
                })
            }
        }
    }

    fn fetch_optional(&self, file: &str) -> Option<PathBuf> {
        match self.fetch(file) {
            Ok(path) => Some(path),
            Err(e) => {
                debug!("Optional file {} unavailable: {}", file, e);
                None
            }
        }
    }

    /// `tokenizer.json` and, when present, `tokenizer_config.json`
    pub fn tokenizer_files(&self) -> Result<(PathBuf, Option<PathBuf>)> {
        let tokenizer = self.fetch(TOKENIZER_FILE)?;
        Ok((tokenizer, self.fetch_optional(TOKENIZER_CONFIG_FILE)))
    }

    pub fn config_file(&self) -> Result<PathBuf> {
        self.fetch(CONFIG_FILE)
    }

    /// The single weight file, or every shard named by the index
    pub fn weight_files(&self) -> Result<Vec<PathBuf>> {
        match self.fetch_optional(WEIGHTS_INDEX_FILE) {
            Some(index) => {
                let shards = shard_names(&index)?;
                info!("Model weights are split into {} shard(s)", shards.len());
                shards.iter().map(|name| self.fetch(name)).collect()
            }
            None => Ok(vec![self.fetch(SINGLE_WEIGHTS_FILE)?]),
        }
    }
}

/// Distinct shard file names listed in a safetensors index
pub fn shard_names(index_path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(index_path)?;
    let index: WeightIndex = serde_json::from_str(&content).map_err(|e| {
        Error::model_loading(format!("Invalid {}: {}", index_path.display(), e))
    })?;
    let names: BTreeSet<String> = index.weight_map.into_values().collect();
    Ok(names.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_directory_source() {
        let dir = TempDir::new().unwrap();
        for file in [CONFIG_FILE, TOKENIZER_FILE, SINGLE_WEIGHTS_FILE] {
            std::fs::write(dir.path().join(file), "{}").unwrap();
        }
        let source = ModelSource::new(dir.path().to_str().unwrap(), None);
        assert!(matches!(source, ModelSource::Local(_)));

        let (tokenizer, tokenizer_config) = source.tokenizer_files().unwrap();
        assert_eq!(tokenizer, dir.path().join(TOKENIZER_FILE));
        assert_eq!(tokenizer_config, None);
        assert_eq!(
            source.weight_files().unwrap(),
            vec![dir.path().join(SINGLE_WEIGHTS_FILE)]
        );
    }

    #[test]
    fn test_sharded_weights() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(WEIGHTS_INDEX_FILE),
            r#"{"metadata": {}, "weight_map": {"a": "model-00002-of-00002.safetensors", "b": "model-00001-of-00002.safetensors", "c": "model-00001-of-00002.safetensors"}}"#,
        )
        .unwrap();
        for shard in ["model-00001-of-00002.safetensors", "model-00002-of-00002.safetensors"] {
            std::fs::write(dir.path().join(shard), "").unwrap();
        }
        let source = ModelSource::Local(dir.path().to_path_buf());
        let files = source.weight_files().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].ends_with("model-00001-of-00002.safetensors"));
    }

    #[test]
    fn test_missing_local_file() {
        let dir = TempDir::new().unwrap();
        let source = ModelSource::Local(dir.path().to_path_buf());
        assert!(matches!(source.config_file(), Err(Error::ModelLoading(_))));
    }

    #[test]
    fn test_non_directory_is_hub_id() {
        let source = ModelSource::new("meta-llama/Llama-3.2-1B-Instruct", Some("hf_x"));
        assert!(matches!(source, ModelSource::Hub { .. }));
        assert!(!format!("{:?}", source).contains("hf_x"));
    }
}
