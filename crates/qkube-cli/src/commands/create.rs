//! Create command - Provision and bootstrap a new cluster
//!
//! Loads credentials and presets, then hands a [`ClusterCreationRequest`] to
//! the orchestrator. On failure the instances that were left behind are
//! logged so they can be cleaned up.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Args;
use tracing::{error, info, warn};

use qkube_cluster::{ClusterCreationRequest, NetworkOptions, OrchestratorConfig, SshConfig};

use super::build_orchestrator;
use crate::{config, Error, Result};

/// Create a Kubernetes cluster
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Cluster name; also names the tag that tracks its instances
    #[arg(long)]
    pub name: String,

    /// Kubernetes version, one of `qkube presets`
    #[arg(long = "version", value_name = "VERSION")]
    pub kubernetes_version: String,

    /// Number of worker nodes
    #[arg(long, default_value_t = 0)]
    pub nodes: u32,

    /// VxNet the instances attach to
    #[arg(long)]
    pub vxnet: String,

    /// Zone; defaults to the zone in the config file
    #[arg(long)]
    pub zone: Option<String>,

    /// Instance class (0 performance, 1 high performance)
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub instance_class: i32,

    /// CNI plugin: calico or flannel
    #[arg(long, default_value = "calico")]
    pub cni: String,

    /// Pod network CIDR
    #[arg(long, default_value = "")]
    pub pod_cidr: String,

    /// Reuse the existing DO_NOT_REMOVE_K8S_KEY key pair
    #[arg(long)]
    pub use_exist_key: bool,

    /// Copy the admin kubeconfig to --kubeconfig-dir
    #[arg(long)]
    pub export_kubeconfig: bool,

    /// Directory that receives `kubeconfig`
    #[arg(long, default_value = ".")]
    pub kubeconfig_dir: PathBuf,

    /// Preset catalog YAML replacing the built-in presets
    #[arg(long)]
    pub presets: Option<PathBuf>,

    /// Public key uploaded as the cluster key pair
    #[arg(long)]
    pub public_key: Option<PathBuf>,

    /// SSH login user on the instances
    #[arg(long, default_value = "root")]
    pub ssh_user: String,

    /// SSH port on the instances
    #[arg(long, default_value_t = 22)]
    pub ssh_port: u16,

    /// Private key for SSH; the agent and default keys are used if unset
    #[arg(long)]
    pub ssh_identity: Option<PathBuf>,

    /// Deadline for each cloud call in seconds
    #[arg(long, default_value_t = 600)]
    pub cloud_timeout_secs: u64,

    /// Deadline for each remote command in seconds
    #[arg(long, default_value_t = 900)]
    pub remote_timeout_secs: u64,
}

impl CreateArgs {
    /// The request this invocation describes
    pub fn request(&self, zone: String) -> ClusterCreationRequest {
        ClusterCreationRequest {
            cluster_name: self.name.clone(),
            kubernetes_version: self.kubernetes_version.clone(),
            node_count: self.nodes,
            network: NetworkOptions {
                cni_plugin: self.cni.clone(),
                pod_cidr: self.pod_cidr.clone(),
            },
            instance_class: self.instance_class,
            vxnet_id: self.vxnet.clone(),
            zone,
            use_existing_ssh_key: self.use_exist_key,
            export_credentials: self.export_kubeconfig,
            local_credential_path: self.kubeconfig_dir.clone(),
        }
    }

    /// Orchestrator tunables from the timeout and key flags
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        if self.cloud_timeout_secs == 0 || self.remote_timeout_secs == 0 {
            return Err(Error::validation("timeouts must be at least one second"));
        }
        Ok(OrchestratorConfig {
            cloud_timeout: Duration::from_secs(self.cloud_timeout_secs),
            remote_timeout: Duration::from_secs(self.remote_timeout_secs),
            public_key_path: self.public_key.clone(),
            ..Default::default()
        })
    }

    /// SSH transport settings
    pub fn ssh_config(&self) -> SshConfig {
        SshConfig {
            user: self.ssh_user.clone(),
            port: self.ssh_port,
            identity_file: self.ssh_identity.clone(),
            ..Default::default()
        }
    }
}

/// Run the create command
pub async fn run(args: CreateArgs, config_path: Option<&Path>) -> Result<()> {
    let cloud = config::load_cloud_config(config_path)?;
    let zone = config::resolve_zone(args.zone.as_deref(), &cloud)?;
    let presets = config::load_presets(args.presets.as_deref())?;
    let request = args.request(zone.clone());

    let orchestrator = build_orchestrator(
        cloud,
        &zone,
        presets,
        args.ssh_config(),
        args.orchestrator_config()?,
    )?;

    info!(
        "Creating cluster '{}' (v{}, {} node(s)) in {}",
        request.cluster_name, request.kubernetes_version, request.node_count, zone
    );
    match orchestrator.create_cluster(&request).await {
        Ok(endpoint) => {
            info!(
                "Cluster '{}' is ready: master {} at {}",
                endpoint.cluster_name,
                endpoint.master.id,
                endpoint.api_server()
            );
            if let Some(path) = &endpoint.kubeconfig {
                info!(
                    "kubeconfig copied, run 'export KUBECONFIG={}; kubectl cluster-info' to try it",
                    path.display()
                );
            }
            Ok(())
        }
        Err(e) => {
            error!(stage = e.stage(), "Cluster creation failed");
            report_leftovers(&request.cluster_name, &e);
            Err(e.into())
        }
    }
}

/// Tell the operator what a failed run left in the account
fn report_leftovers(cluster: &str, err: &qkube_common::Error) {
    let created = err.created_instances();
    if !created.is_empty() {
        // Not tagged yet, so `qkube delete` cannot find them
        warn!(
            "Untagged instances left in place: {}; terminate them manually",
            created.join(", ")
        );
    } else if !matches!(err.stage(), "validation" | "tag" | "key" | "provisioning") {
        warn!(
            "Instances were left in place, run 'qkube delete --name {}' to remove them",
            cluster
        );
    }
}
