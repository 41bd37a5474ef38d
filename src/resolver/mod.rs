//! Base model identifier resolution
//!
//! Users may name the base model with a serving-runtime tag (`llama3:8b`) or a
//! short alias instead of a hub repository id. The alias table lives in
//! `aliases.yaml` next to this module so new aliases are a data change; a run
//! configuration can extend it further through [`ModelAliases::with_overrides`].

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

const BUILTIN_ALIASES: &str = include_str!("aliases.yaml");

static BUILTIN: Lazy<BTreeMap<String, String>> = Lazy::new(|| {
    match serde_yaml::from_str::<BTreeMap<String, String>>(BUILTIN_ALIASES) {
        Ok(table) => table
            .into_iter()
            .map(|(key, repo)| (normalize_key(&key), repo))
            .collect(),
        Err(e) => {
            warn!("Built-in alias table is unreadable, aliases disabled: {}", e);
            BTreeMap::new()
        }
    }
});

/// Normalize a user-supplied model name into an alias lookup key
pub fn normalize_key(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|c| *c != ' ')
        .collect::<String>()
        .to_lowercase()
}

/// Outcome of resolving a model name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedModel {
    /// Name exactly as the user supplied it
    pub raw: String,
    /// Canonical repository identifier (or the trimmed input on a miss)
    pub id: String,
    /// Alias key that matched, if any
    pub alias: Option<String>,
}

/// Alias table mapping short names to repository identifiers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAliases {
    table: BTreeMap<String, String>,
}

impl Default for ModelAliases {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelAliases {
    /// The aliases shipped with lorafit
    pub fn builtin() -> Self {
        Self {
            table: BUILTIN.clone(),
        }
    }

    /// An empty table; every name passes through
    pub fn empty() -> Self {
        Self {
            table: BTreeMap::new(),
        }
    }

    /// Extend or override entries; keys are normalized like lookups
    pub fn with_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, repo) in overrides {
            self.table.insert(normalize_key(key.as_ref()), repo.into());
        }
        self
    }

    /// Number of aliases in the table
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table has no aliases
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Look up a single key without logging
    pub fn lookup(&self, raw: &str) -> Option<&str> {
        self.table.get(&normalize_key(raw)).map(String::as_str)
    }

    /// Resolve a user-supplied name to a repository identifier.
    ///
    /// Total: unknown names come back trimmed but otherwise unchanged.
    pub fn resolve(&self, raw: &str) -> ResolvedModel {
        let key = normalize_key(raw);
        let resolved = match self.table.get(&key) {
            Some(repo) => ResolvedModel {
                raw: raw.to_string(),
                id: repo.clone(),
                alias: Some(key),
            },
            None => ResolvedModel {
                raw: raw.to_string(),
                id: raw.trim().to_string(),
                alias: None,
            },
        };
        info!(" base_model   : {}  ->  {}", resolved.raw.trim(), resolved.id);
        resolved
    }

    /// Tag the serving runtime knows the base model by.
    ///
    /// The matched alias wins; otherwise the first alias (in key order) for
    /// the same repository; otherwise the repository id itself.
    pub fn serving_tag(&self, model: &ResolvedModel) -> String {
        if let Some(alias) = &model.alias {
            return alias.clone();
        }
        self.table
            .iter()
            .find(|(_, repo)| **repo == model.id)
            .map(|(key, _)| key.clone())
            .unwrap_or_else(|| model.id.clone())
    }
}

/// Resolve against the built-in alias table
pub fn resolve_model_id(raw: &str) -> ResolvedModel {
    ModelAliases::builtin().resolve(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Llama3:8B", "meta-llama/Meta-Llama-3-8B-Instruct" ; "tag with uppercase")]
    #[test_case("  llama3 : instruct ", "meta-llama/Meta-Llama-3-8B-Instruct" ; "internal spaces")]
    #[test_case("llama3.2:1b-instruct", "meta-llama/Llama-3.2-1B-Instruct" ; "llama 3.2 1b")]
    #[test_case("QWEN2.5:0.5B", "Qwen/Qwen2.5-0.5B-Instruct" ; "qwen")]
    #[test_case("custom/model-id", "custom/model-id" ; "pass through")]
    #[test_case("  Org/Some Model  ", "Org/Some Model" ; "pass through keeps case and inner spaces")]
    #[test_case("", "" ; "empty")]
    fn test_resolve(raw: &str, expected: &str) {
        assert_eq!(resolve_model_id(raw).id, expected);
    }

    #[test]
    fn test_builtin_table_parses() {
        let aliases = ModelAliases::builtin();
        assert_eq!(aliases.len(), 6);
        assert_eq!(
            aliases.lookup("qwen2.5:1.5b"),
            Some("Qwen/Qwen2.5-1.5B-Instruct")
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let aliases = ModelAliases::builtin();
        assert_eq!(aliases.resolve("Llama3:8B"), aliases.resolve("Llama3:8B"));
    }

    #[test]
    fn test_overrides_are_normalized() {
        let aliases = ModelAliases::builtin().with_overrides([("My Model", "acme/my-model")]);
        let resolved = aliases.resolve("mymodel");
        assert_eq!(resolved.id, "acme/my-model");
        assert_eq!(resolved.alias.as_deref(), Some("mymodel"));
    }

    #[test]
    fn test_serving_tag() {
        let aliases = ModelAliases::builtin();

        let tagged = aliases.resolve("LLAMA3:8B");
        assert_eq!(aliases.serving_tag(&tagged), "llama3:8b");

        let by_repo = aliases.resolve("meta-llama/Llama-3.2-1B-Instruct");
        assert_eq!(aliases.serving_tag(&by_repo), "llama3.2:1b-instruct");

        let unknown = aliases.resolve("custom/model-id");
        assert_eq!(aliases.serving_tag(&unknown), "custom/model-id");
    }
}
