pub mod args;
pub mod error;
pub mod logging;
pub mod marker;

pub use args::TrainArgs;
pub use error::{CliError, CliResult};
pub use marker::MarkerLocation;
