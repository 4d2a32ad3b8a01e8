//! `clap`-derived CLI surface (component O).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "runner", about = "Security-focused privileged batch command runner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Verify every declared path, then execute every group in order.
    Run(RunArgs),
    /// Record integrity hashes for every file the config declares.
    Record(RecordArgs),
    /// Verify every declared path without executing anything.
    Verify(VerifyArgs),
}

#[derive(Debug, Parser)]
pub struct RunArgs {
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub dry_run: bool,
    #[arg(long)]
    pub keep_temp_dirs: bool,
}

#[derive(Debug, Parser)]
pub struct RecordArgs {
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Debug, Parser)]
pub struct VerifyArgs {
    #[arg(long)]
    pub config: PathBuf,
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn log_level(&self) -> Option<&str> {
        match &self.command {
            Commands::Run(a) => a.log_level.as_deref(),
            Commands::Record(a) => a.log_level.as_deref(),
            Commands::Verify(a) => a.log_level.as_deref(),
        }
    }
}
