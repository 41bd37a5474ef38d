use anyhow::{anyhow, Result};
use colored::*;
use std::io::{self, IsTerminal};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default filter directives for a verbosity count
pub fn default_directives(verbosity: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbosity {
        0 => "lorafit=info,lorafit_core=info,warn",
        1 => "lorafit=debug,lorafit_core=debug,info",
        2 => "lorafit=trace,lorafit_core=trace,debug",
        _ => "trace",
    }
}

pub fn init_logging(verbosity: u8, quiet: bool, json_output: bool) -> Result<()> {
    // RUST_LOG wins unless the user asked for silence
    let env_filter = if quiet {
        EnvFilter::new(default_directives(verbosity, quiet))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity, quiet)))
    };

    let is_terminal = io::stdout().is_terminal();

    let installed = if json_output {
        // JSON output for machine parsing
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(json_layer).try_init()
    } else if is_terminal && !quiet {
        // Pretty terminal output
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_ansi(true)
            .event_format(TerminalFormatter)
            .with_filter(env_filter);

        tracing_subscriber::registry().with(fmt_layer).try_init()
    } else {
        // Plain output, e.g. when redirected into a train.log
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .without_time()
            .with_filter(env_filter);

        tracing_subscriber::registry().with(fmt_layer).try_init()
    };

    installed.map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}

/// Terminal formatter: dimmed clock, colored level tag, and debug-level
/// messages dimmed so progress lines stand out
struct TerminalFormatter;

impl<S, N> fmt::FormatEvent<S, N> for TerminalFormatter
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &fmt::FmtContext<'_, S, N>,
        mut writer: fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        let level = *event.metadata().level();
        let clock = chrono::Local::now().format("%H:%M:%S%.3f").to_string();

        let tag = format!("{:<5}", level.as_str());
        let tag = match level {
            Level::ERROR => tag.red().bold(),
            Level::WARN => tag.yellow().bold(),
            Level::INFO => tag.green(),
            Level::DEBUG => tag.blue(),
            Level::TRACE => tag.purple(),
        };

        let mut message = String::new();
        ctx.field_format()
            .format_fields(fmt::format::Writer::new(&mut message), event)?;
        let message = if matches!(level, Level::DEBUG | Level::TRACE) {
            message.dimmed()
        } else {
            message.normal()
        };

        writeln!(writer, "{} {} {}", clock.dimmed(), tag, message)
    }
}
