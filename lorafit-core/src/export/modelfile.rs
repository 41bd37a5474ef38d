//! Ollama `Modelfile` for the trained adapter

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use lorafit::lora::ADAPTER_WEIGHTS_FILE;
use lorafit::Result;

/// Name of the manifest inside the output directory
pub const MODELFILE_NAME: &str = "Modelfile";

/// System preamble used when the configuration does not set one
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a concise E-commerce Returns & Refunds assistant. Stick strictly to policy.";

/// Prompt template matching the rendering of training examples
pub const PROMPT_TEMPLATE: &str = "User: {{ .Prompt }}\nAssistant:";

/// Serving parameters plus the base model and adapter they apply to
#[derive(Debug, Clone, PartialEq)]
pub struct ServingManifest {
    pub from: String,
    pub adapter: String,
    pub system: String,
    pub template: String,
    pub temperature: f32,
    pub num_predict: usize,
}

impl ServingManifest {
    pub fn new(serving_tag: impl Into<String>) -> Self {
        Self {
            from: serving_tag.into(),
            adapter: format!("./{}", ADAPTER_WEIGHTS_FILE),
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            template: PROMPT_TEMPLATE.to_string(),
            temperature: 0.2,
            num_predict: 256,
        }
    }

    pub fn with_system_prompt(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail
        let _ = writeln!(out, "FROM {}", self.from);
        let _ = writeln!(out, "ADAPTER {}", self.adapter);
        let _ = writeln!(out);
        let _ = writeln!(out, "SYSTEM {}", quote(&self.system));
        let _ = writeln!(out);
        let _ = writeln!(out, "TEMPLATE \"\"\"{}\"\"\"", self.template);
        let _ = writeln!(out);
        let _ = writeln!(out, "PARAMETER temperature {}", self.temperature);
        let _ = writeln!(out, "PARAMETER num_predict {}", self.num_predict);
        out
    }

    /// Overwrite `<dir>/Modelfile`
    pub fn write(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(MODELFILE_NAME);
        std::fs::write(&path, self.render())?;
        Ok(path)
    }
}

/// Plain double quotes unless the text needs the triple-quoted form
fn quote(text: &str) -> String {
    if text.contains('"') || text.contains('\n') {
        format!("\"\"\"{}\"\"\"", text)
    } else {
        format!("\"{}\"", text)
    }
}
