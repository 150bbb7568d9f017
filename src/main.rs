//! sasmap CLI - deterministic SAS codebase mapping tool
//!
//! Usage: sasmap <command> [arguments]

mod cli;
mod credentials_cmd;
mod impact_cmd;
mod scan_cmd;
mod status_cmd;
mod table_cmd;

use clap::Parser;
use sasmap::config::ConfigError;
use sasmap::graph::{Direction, QueryError};
use sasmap::output::{output_error, OutputFormat};
use sasmap::scan::ScanError;
use sasmap::source::SourceError;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command};

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Stable code for a failed command
fn error_code(e: &anyhow::Error) -> &'static str {
    if let Some(e) = e.downcast_ref::<ScanError>() {
        return e.code();
    }
    if let Some(e) = e.downcast_ref::<QueryError>() {
        return e.code();
    }
    if let Some(e) = e.downcast_ref::<ConfigError>() {
        return e.code();
    }
    if e.downcast_ref::<SourceError>().is_some() {
        return sasmap::error_codes::SASMAP_SRC_002_READ_FAILED;
    }
    sasmap::error_codes::SASMAP_GEN_001_COMMAND_FAILED
}

/// Configuration problems exit with 2, everything else with 1
fn exit_code(e: &anyhow::Error) -> ExitCode {
    let is_config = e.downcast_ref::<ConfigError>().is_some()
        || matches!(e.downcast_ref::<ScanError>(), Some(ScanError::Config(_)));
    if is_config {
        ExitCode::from(2)
    } else {
        ExitCode::from(1)
    }
}

fn dispatch(command: Command, format: OutputFormat) -> anyhow::Result<()> {
    match command {
        Command::Scan(args) => scan_cmd::run_scan_cmd(&args.config.config, args.full, format),
        Command::Impact(args) => impact_cmd::run_impact(
            &args.config.config,
            &args.identifier,
            args.direction.into(),
            args.max_depth,
            format,
        ),
        Command::Upstream(args) => impact_cmd::run_closure(
            &args.config.config,
            &args.program,
            Direction::Backward,
            args.max_depth,
            format,
        ),
        Command::Downstream(args) => impact_cmd::run_closure(
            &args.config.config,
            &args.program,
            Direction::Forward,
            args.max_depth,
            format,
        ),
        Command::Table(args) => table_cmd::run_table(&args.config.config, &args.table, format),
        Command::Credentials(args) => credentials_cmd::run_credentials(&args.config, format),
        Command::Status(args) => status_cmd::run_status(&args.config, format),
        Command::Version => {
            println!("{}", sasmap::version());
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match dispatch(cli.command, cli.output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output_error(cli.output, error_code(&e), &format!("{:#}", e));
            exit_code(&e)
        }
    }
}
