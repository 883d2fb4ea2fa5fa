//! # rla-cli
//!
//! Command-line driver for risk-limiting audits.
//!
//! Every command loads the audit from its snapshot, does one step, and saves
//! it again, so an audit can span many sessions and machines:
//! - `rla init`: create an audit from a config, contests and CVRs
//! - `rla round start/run/pending`: draw a round's sample, then audit it
//! - `rla status/list/finalize`: inspect audits and close them out
//! - `rla journal verify/tail`: inspect the hash-chained round journal

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

/// Risk-limiting audit CLI.
#[derive(Parser)]
#[command(name = "rla", version, about)]
struct Cli {
    /// Directory holding audit snapshots and journals.
    #[arg(long, default_value = ".rla")]
    data_dir: PathBuf,

    /// Log output format (logs go to stderr).
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new audit.
    Init(commands::init::InitArgs),
    /// Start and run audit rounds.
    Round {
        #[command(subcommand)]
        command: commands::round::RoundCommands,
    },
    /// Show an audit's rounds and contest decisions.
    Status {
        /// Audit ID.
        id: String,
        /// Print the full audit state as JSON.
        #[arg(long)]
        json: bool,
    },
    /// List all audits.
    List,
    /// Close an audit, escalating undecided contests to hand counts.
    Finalize {
        /// Audit ID.
        id: String,
    },
    /// Inspect the round journal.
    Journal {
        #[command(subcommand)]
        command: commands::journal::JournalCommands,
    },
}

fn init_logging(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("rla_audit=info".parse()?)
        .add_directive("rla_core=info".parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;
    let config = CliConfig::for_dir(&cli.data_dir);

    match &cli.command {
        Commands::Init(args) => commands::init::execute(args, &config),
        Commands::Round { command } => commands::round::execute(command, &config),
        Commands::Status { id, json } => commands::report::status(&config, id, *json),
        Commands::List => commands::report::list(&config),
        Commands::Finalize { id } => commands::report::finalize(&config, id),
        Commands::Journal { command } => commands::journal::execute(command, &config),
    }
}
