//! Common types for qkube: errors, presets, and shared constants

#![deny(missing_docs)]

pub mod error;
pub mod preset;
pub mod telemetry;

pub use error::Error;
pub use preset::{Preset, PresetCatalog};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Prefix of the tag that groups all instances of one cluster
pub const CLUSTER_TAG_PREFIX: &str = "K8S-Cluster-";

/// Name of the key pair shared by every cluster in the account
pub const SSH_KEY_NAME: &str = "DO_NOT_REMOVE_K8S_KEY";

/// Admin kubeconfig written by `kubeadm init` on the master
pub const ADMIN_KUBECONFIG_PATH: &str = "/etc/kubernetes/admin.conf";

/// File name of the exported kubeconfig inside the local directory
pub const LOCAL_KUBECONFIG_FILE: &str = "kubeconfig";

/// Name of the tag that tracks a cluster's resources
///
/// The cluster name is the only identity key: two clusters created with the
/// same name share one tag.
pub fn cluster_tag_name(cluster_name: &str) -> String {
    format!("{}{}", CLUSTER_TAG_PREFIX, cluster_name)
}
