//! lorafit Core Library
//!
//! This crate turns the `lorafit` training library into a runnable tool:
//! - Command-line parsing, logging setup and the error marker
//! - Export of the trained adapter and the serving `Modelfile`
//! - The orchestrator that sequences a run end to end

pub mod cli;
pub mod export;
pub mod orchestrator;

// Re-export from the main lorafit crate
pub use lorafit::{Error, ResolvedModel, RunConfiguration};

pub use cli::{CliError, CliResult, MarkerLocation, TrainArgs};
pub use export::{ArtifactExporter, ExportReport};
pub use orchestrator::{Orchestrator, RunSummary};

/// Current version of lorafit Core
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
