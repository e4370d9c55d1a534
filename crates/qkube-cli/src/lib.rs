//! qkube CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use qkube_common::telemetry::LogFormat;

/// qkube - Kubernetes clusters on QingCloud
#[derive(Parser, Debug)]
#[command(name = "qkube")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// QingCloud config file (default: $QKUBE_CONFIG, then ~/.qingcloud/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text", value_parser = parse_log_format)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_log_format(s: &str) -> std::result::Result<LogFormat, String> {
    s.parse()
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision and bootstrap a new cluster
    Create(commands::create::CreateArgs),
    /// Terminate the instances of a cluster
    Delete(commands::delete::DeleteArgs),
    /// List supported Kubernetes versions
    Presets(commands::presets::PresetsArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let config = self.config.as_deref();
        match self.command {
            Commands::Create(args) => commands::create::run(args, config).await,
            Commands::Delete(args) => commands::delete::run(args, config).await,
            Commands::Presets(args) => commands::presets::run(args),
        }
    }
}
