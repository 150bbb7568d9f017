//! CLI argument parsing for sasmap
//!
//! Defines the [`Cli`] parser and the subcommands. Every query command reads the
//! same YAML configuration as `scan` so it finds the same database.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use sasmap::config::ScanConfig;
use sasmap::graph::Direction;
use sasmap::output::OutputFormat;
use sasmap::store::SqliteStore;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "sasmap",
    version,
    about = "SAS codebase mapping and impact analysis"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Human, global = true)]
    pub output: OutputFormat,

    /// Increase log verbosity (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one incremental scan pass over the configured roots
    Scan(ScanArgs),
    /// Everything reachable from a program or table
    Impact(ImpactArgs),
    /// Programs reached backward: writers of what it reads, what it includes or calls
    Upstream(ClosureArgs),
    /// Programs reached forward: readers of what it writes, its includers and callers
    Downstream(ClosureArgs),
    /// Every program reading or writing a table
    Table(TableArgs),
    /// Programs holding literal credentials
    Credentials(ConfigArgs),
    /// Row counts and flagged programs
    Status(ConfigArgs),
    /// Print version and build information
    Version,
}

#[derive(Args, Clone)]
pub struct ConfigArgs {
    /// YAML configuration file
    #[arg(short, long, default_value = "sasmap.yaml")]
    pub config: PathBuf,
}

#[derive(Args, Clone)]
pub struct ScanArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Re-extract every listed program regardless of mtime
    #[arg(long)]
    pub full: bool,
}

#[derive(Args, Clone)]
pub struct ImpactArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Program path or table identifier
    pub identifier: String,

    #[arg(long, value_enum, default_value_t = DirectionArg::Forward)]
    pub direction: DirectionArg,

    /// Hop bound (defaults to `max_depth` from the configuration)
    #[arg(long)]
    pub max_depth: Option<usize>,
}

#[derive(Args, Clone)]
pub struct ClosureArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Program path
    pub program: String,

    #[arg(long)]
    pub max_depth: Option<usize>,
}

#[derive(Args, Clone)]
pub struct TableArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Table identifier, e.g. `schema.table` or `db.schema.table`
    pub table: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DirectionArg {
    Forward,
    Backward,
}

impl From<DirectionArg> for Direction {
    fn from(arg: DirectionArg) -> Self {
        match arg {
            DirectionArg::Forward => Direction::Forward,
            DirectionArg::Backward => Direction::Backward,
        }
    }
}

/// Load and validate the configuration
pub fn load_config(path: &Path) -> Result<ScanConfig> {
    let config = ScanConfig::load(path)?;
    tracing::debug!(
        config = %path.display(),
        database = %config.database.display(),
        roots = config.roots.len(),
        "Configuration loaded"
    );
    Ok(config)
}

/// Open the database of a previous scan; queries never create one
pub fn open_existing_store(config: &ScanConfig) -> Result<SqliteStore> {
    if !config.database.exists() {
        anyhow::bail!(
            "Database {} does not exist; run `sasmap scan` first",
            config.database.display()
        );
    }
    SqliteStore::open(&config.database)
        .with_context(|| format!("Failed to open database {}", config.database.display()))
}
