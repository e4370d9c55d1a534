//! Kubernetes cluster bring-up on QingCloud
//!
//! The [`ClusterOrchestrator`] ties the cloud collaborators from `qkube-cloud`
//! to a [`RemoteExecutor`] and drives one cluster from empty account to
//! joined nodes.

pub mod bootstrap;
pub mod local;
pub mod orchestrator;
pub mod remote;
pub mod request;

pub use bootstrap::{extract_join_directive, kubeadm_init_command, CniPlugin, JOIN_MARKER};
pub use orchestrator::{ClusterEndpoint, ClusterOrchestrator, OrchestratorConfig};
pub use remote::{RemoteExecutor, SshConfig, SshExecutor};
pub use request::{ClusterCreationRequest, NetworkOptions};
