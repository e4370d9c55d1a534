//! CLI commands

use std::sync::Arc;

use qkube_cloud::{CloudConfig, QingCloudClient};
use qkube_cluster::{ClusterOrchestrator, OrchestratorConfig, SshConfig, SshExecutor};
use qkube_common::PresetCatalog;

use crate::Result;

pub mod create;
pub mod delete;
pub mod presets;

/// Wire one QingCloud client and the SSH executor into an orchestrator
///
/// The client is zone-scoped and serves as instance, tag and key pair
/// service at once. Its job waits are sized to the cloud deadline.
pub(crate) fn build_orchestrator(
    cloud: CloudConfig,
    zone: &str,
    presets: PresetCatalog,
    ssh: SshConfig,
    config: OrchestratorConfig,
) -> Result<ClusterOrchestrator> {
    let client =
        Arc::new(QingCloudClient::new(cloud, zone)?.within_deadline(config.cloud_timeout));
    Ok(ClusterOrchestrator::new(
        Arc::new(presets),
        client.clone(),
        client.clone(),
        client,
        Arc::new(SshExecutor::new(ssh)),
    )
    .with_config(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orchestrator_is_scoped_to_zone() {
        let orchestrator = build_orchestrator(
            CloudConfig::new("AKID", "SECRET"),
            "pek3b",
            PresetCatalog::builtin(),
            SshConfig::default(),
            OrchestratorConfig::default(),
        );
        assert!(orchestrator.is_ok());

        let err = build_orchestrator(
            CloudConfig::new("AKID", "SECRET"),
            "",
            PresetCatalog::builtin(),
            SshConfig::default(),
            OrchestratorConfig::default(),
        );
        assert!(err.is_err());
    }
}
