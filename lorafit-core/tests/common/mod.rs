//! Shared fixtures: an in-memory model backend and dataset helpers

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lorafit::lora::{ADAPTER_CONFIG_FILE, ADAPTER_WEIGHTS_FILE};
use lorafit::training::{
    BaseModel, Batch, ModelBackend, ParameterCounts, TextTokenizer, TrainableModel,
};
use lorafit::{ExecutionContext, LoraConfig, PeftConfig, Result};
use lorafit_core::{Orchestrator, TrainArgs};
use safetensors::tensor::{Dtype, TensorView};
use tempfile::TempDir;

/// Which files the fake model writes when asked to save its adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterWrite {
    WeightsAndConfig,
    WeightsOnly,
    Nothing,
}

#[derive(Debug, Default)]
pub struct Journal {
    pub updates: usize,
    pub restored_from: Option<PathBuf>,
    pub models_loaded: Vec<String>,
}

#[derive(Clone)]
pub struct FakeBackend {
    pub journal: Arc<Mutex<Journal>>,
    pub adapter_write: AdapterWrite,
}

impl FakeBackend {
    pub fn new(adapter_write: AdapterWrite) -> Self {
        Self {
            journal: Arc::new(Mutex::new(Journal::default())),
            adapter_write,
        }
    }

    pub fn updates(&self) -> usize {
        self.journal.lock().unwrap().updates
    }

    pub fn restored_from(&self) -> Option<PathBuf> {
        self.journal.lock().unwrap().restored_from.clone()
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(Arc::new(self.clone()))
            .with_heartbeat(None)
            .with_context(ExecutionContext::cpu())
    }
}

struct WhitespaceTokenizer;

impl TextTokenizer for WhitespaceTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text
            .split_whitespace()
            .map(|word| 1 + (word.len() as u32 % 50))
            .collect())
    }

    fn pad_token_id(&self) -> u32 {
        0
    }
}

struct FakeBase {
    journal: Arc<Mutex<Journal>>,
    adapter_write: AdapterWrite,
}

struct FakeModel {
    journal: Arc<Mutex<Journal>>,
    adapter_write: AdapterWrite,
    settings: LoraConfig,
    loss: f64,
}

impl ModelBackend for FakeBackend {
    fn load_tokenizer(&self, _: &str, _: &ExecutionContext) -> Result<Box<dyn TextTokenizer>> {
        Ok(Box::new(WhitespaceTokenizer))
    }

    fn load_model(&self, model_id: &str, _: &ExecutionContext) -> Result<Box<dyn BaseModel>> {
        self.journal
            .lock()
            .unwrap()
            .models_loaded
            .push(model_id.to_string());
        Ok(Box::new(FakeBase {
            journal: self.journal.clone(),
            adapter_write: self.adapter_write,
        }))
    }
}

impl BaseModel for FakeBase {
    fn apply_adapter(self: Box<Self>, settings: &LoraConfig) -> Result<Box<dyn TrainableModel>> {
        Ok(Box::new(FakeModel {
            journal: self.journal,
            adapter_write: self.adapter_write,
            settings: settings.clone(),
            loss: 3.0,
        }))
    }
}

impl TrainableModel for FakeModel {
    fn accumulate(&mut self, batch: &Batch, _scale: f64) -> Result<f64> {
        assert!(!batch.is_empty());
        Ok(self.loss)
    }

    fn apply_update(&mut self, _learning_rate: f64, _max_grad_norm: Option<f64>) -> Result<()> {
        self.loss *= 0.9;
        self.journal.lock().unwrap().updates += 1;
        Ok(())
    }

    fn save_checkpoint(&self, dir: &Path) -> Result<()> {
        write_weights(&dir.join(ADAPTER_WEIGHTS_FILE));
        Ok(())
    }

    fn load_checkpoint(&mut self, dir: &Path) -> Result<()> {
        self.journal.lock().unwrap().restored_from = Some(dir.to_path_buf());
        Ok(())
    }

    fn save_adapter(&self, dir: &Path, base_model: &str) -> Result<()> {
        match self.adapter_write {
            AdapterWrite::WeightsAndConfig => {
                write_weights(&dir.join(ADAPTER_WEIGHTS_FILE));
                PeftConfig::from_lora(&self.settings, base_model)
                    .write(&dir.join(ADAPTER_CONFIG_FILE))?;
            }
            AdapterWrite::WeightsOnly => write_weights(&dir.join(ADAPTER_WEIGHTS_FILE)),
            AdapterWrite::Nothing => {}
        }
        Ok(())
    }

    fn parameter_counts(&self) -> ParameterCounts {
        ParameterCounts {
            trainable: 32,
            total: 1024,
        }
    }
}

/// A two-tensor PEFT-style weight file
pub fn write_weights(path: &Path) {
    let data: Vec<u8> = [0.5f32; 8].iter().flat_map(|v| v.to_le_bytes()).collect();
    let a = TensorView::new(Dtype::F32, vec![2, 4], &data).unwrap();
    let b = TensorView::new(Dtype::F32, vec![4, 2], &data).unwrap();
    let bytes = safetensors::serialize(
        [
            ("base_model.model.model.layers.0.self_attn.q_proj.lora_A.weight", a),
            ("base_model.model.model.layers.0.self_attn.q_proj.lora_B.weight", b),
        ],
        &None,
    )
    .unwrap();
    std::fs::write(path, bytes).unwrap();
}

/// JSONL dataset with `records` prompt/response pairs
pub fn write_dataset(dir: &Path, records: usize) -> PathBuf {
    let path = dir.join("train.jsonl");
    let lines: Vec<String> = (0..records)
        .map(|i| {
            format!(
                "{{\"prompt\": \"Can I return item {}?\", \"response\": \"Yes, within 30 days.\"}}",
                i
            )
        })
        .collect();
    std::fs::write(&path, lines.join("\n") + "\n").unwrap();
    path
}

pub struct Workspace {
    pub dir: TempDir,
    pub data: PathBuf,
    pub outdir: PathBuf,
}

impl Workspace {
    pub fn new(records: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let data = write_dataset(dir.path(), records);
        let outdir = dir.path().join("artifacts");
        Self { dir, data, outdir }
    }

    /// Flags for a run over this workspace plus `extra`
    pub fn args(&self, extra: &[&str]) -> TrainArgs {
        let mut argv = vec![
            "lorafit".to_string(),
            "--data".to_string(),
            self.data.display().to_string(),
            "--outdir".to_string(),
            self.outdir.display().to_string(),
            "--heartbeat-secs".to_string(),
            "0".to_string(),
        ];
        argv.extend(extra.iter().map(|s| s.to_string()));
        <TrainArgs as clap::Parser>::try_parse_from(argv).unwrap()
    }

    pub fn checkpoints(&self) -> Vec<String> {
        let mut names: Vec<String> = match std::fs::read_dir(self.outdir.join("hf_out")) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }
}
