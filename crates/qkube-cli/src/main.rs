//! qkube CLI
//!
//! Creates and deletes small Kubernetes clusters on QingCloud.

use clap::Parser;

use qkube_cli::{Cli, Result};
use qkube_common::telemetry::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;
    cli.run().await
}
