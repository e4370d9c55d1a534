//! Delete command - Terminate every instance of a cluster

use std::path::Path;
use std::time::Duration;

use clap::Args;
use tracing::info;

use qkube_cluster::{OrchestratorConfig, SshConfig};
use qkube_common::PresetCatalog;

use super::build_orchestrator;
use crate::{config, Error, Result};

/// Delete a cluster created by qkube
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Name the cluster was created with
    #[arg(long)]
    pub name: String,

    /// Zone; defaults to the zone in the config file
    #[arg(long)]
    pub zone: Option<String>,

    /// Deadline for each cloud call in seconds
    #[arg(long, default_value_t = 600)]
    pub cloud_timeout_secs: u64,
}

/// Run the delete command
pub async fn run(args: DeleteArgs, config_path: Option<&Path>) -> Result<()> {
    if args.cloud_timeout_secs == 0 {
        return Err(Error::validation("timeouts must be at least one second"));
    }
    let cloud = config::load_cloud_config(config_path)?;
    let zone = config::resolve_zone(args.zone.as_deref(), &cloud)?;

    let orchestrator = build_orchestrator(
        cloud,
        &zone,
        PresetCatalog::builtin(),
        SshConfig::default(),
        OrchestratorConfig {
            cloud_timeout: Duration::from_secs(args.cloud_timeout_secs),
            ..Default::default()
        },
    )?;

    let terminated = orchestrator.delete_cluster(&args.name).await?;
    if terminated.is_empty() {
        info!("Cluster '{}' has no live instances", args.name);
    } else {
        info!(
            "Terminated {} instance(s) of cluster '{}': {}",
            terminated.len(),
            args.name,
            terminated.join(", ")
        );
    }
    Ok(())
}
