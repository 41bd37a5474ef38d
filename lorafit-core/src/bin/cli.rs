use clap::Parser;
use lorafit::CandleBackend;
use lorafit_core::cli::{self, MarkerLocation, TrainArgs};
use lorafit_core::Orchestrator;
use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;

#[tokio::main]
async fn main() -> ExitCode {
    let argv: Vec<OsString> = std::env::args_os().collect();

    // Phase 1: only the output directory, so failures below can leave a marker
    let marker = MarkerLocation::from_args(argv.iter().skip(1).cloned());

    // Phase 2: full parse; usage errors keep clap's own exit status
    let args = TrainArgs::parse_from(&argv);

    if let Err(e) = cli::logging::init_logging(args.verbose, args.quiet, args.json) {
        eprintln!("{:#}", e);
    }

    let orchestrator =
        Orchestrator::new(Arc::new(CandleBackend)).with_heartbeat(args.heartbeat_interval());

    match orchestrator.execute(&args, &marker).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            e.print_error();
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
