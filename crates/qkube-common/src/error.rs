//! Error types for qkube
//!
//! Every failure in a cluster run is fatal. Stage variants (tag, key,
//! provisioning, bootstrap, cni, join, export) wrap the collaborator error
//! that caused them, so the message names both the stage and the cause.
//! Nothing is rolled back: variants that can leave cloud resources behind
//! carry the IDs an operator needs for cleanup.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for qkube operations
#[derive(Debug, Error)]
pub enum Error {
    /// The creation request failed validation
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Description of what's invalid
        message: String,
    },

    /// The requested Kubernetes version has no preset
    #[error("kubernetes version {version} is not supported")]
    UnsupportedVersion {
        /// The version that was requested
        version: String,
    },

    /// Reading the local public key or creating the remote key pair failed
    #[error("ssh key preparation failed: {source}")]
    SshKeyPreparationFailed {
        /// Underlying cause
        source: Box<Error>,
    },

    /// Looking up or creating the cluster tag failed
    #[error("tag operation failed for {tag}: {source}")]
    TagOperationFailed {
        /// Name of the tag
        tag: String,
        /// Underlying cause
        source: Box<Error>,
    },

    /// Attaching the cluster tag to the created instances failed
    #[error("tagging instances with {tag_id} failed: {source}")]
    TagAssociationFailed {
        /// ID of the tag being attached
        tag_id: String,
        /// Underlying cause
        source: Box<Error>,
    },

    /// One or both provisioning branches failed
    #[error(
        "provisioning failed for {cluster} ({} error(s)): {}; created instances left in place: [{}]",
        .errors.len(),
        format_errors(.errors),
        .created_instances.join(", ")
    )]
    ProvisioningFailed {
        /// Name of the cluster being created
        cluster: String,
        /// Every error reported by the parallel provisioning phase
        errors: Vec<Error>,
        /// IDs of the instances that were created before the run aborted
        created_instances: Vec<String>,
    },

    /// The network plugin is not one of the supported presets
    #[error("CNI plugin {plugin} is not supported, expected calico or flannel")]
    UnsupportedCni {
        /// Plugin name from the request
        plugin: String,
    },

    /// No pod network CIDR was given
    #[error("a pod network CIDR must be specified")]
    MissingPodCidr,

    /// Running `kubeadm init` on the master failed
    #[error("bootstrap of master {master} failed: {source}")]
    BootstrapExecutionFailed {
        /// ID of the master instance
        master: String,
        /// Underlying cause
        source: Box<Error>,
    },

    /// The bootstrap output did not contain a usable join command
    #[error("no `{marker}` command found in bootstrap output")]
    JoinDirectiveNotFound {
        /// Marker that was searched for
        marker: String,
    },

    /// Applying the network plugin manifests failed
    #[error("applying CNI plugin {plugin} failed: {source}")]
    CniApplyFailed {
        /// Plugin being applied
        plugin: String,
        /// Underlying cause
        source: Box<Error>,
    },

    /// A worker node failed to join; later nodes were not attempted
    #[error(
        "node {node_id} ({node_ip}) failed to join the cluster: {source}; already joined: [{}]",
        .joined.join(", ")
    )]
    NodeJoinFailed {
        /// ID of the node that failed
        node_id: String,
        /// Address of the node that failed
        node_ip: String,
        /// IDs of the nodes that joined before the failure
        joined: Vec<String>,
        /// Underlying cause
        source: Box<Error>,
    },

    /// Copying the admin kubeconfig to the local machine failed
    #[error("exporting kubeconfig to {path} failed: {source}")]
    CredentialExportFailed {
        /// Local destination
        path: String,
        /// Underlying cause
        source: Box<Error>,
    },

    /// No tag exists for the named cluster
    #[error("cluster not found: {cluster}")]
    ClusterNotFound {
        /// Name of the cluster
        cluster: String,
    },

    /// Terminating a cluster's instances failed
    #[error("deleting cluster {cluster} failed: {source}")]
    DeletionFailed {
        /// Name of the cluster
        cluster: String,
        /// Underlying cause
        source: Box<Error>,
    },

    /// Cloud API call failed
    #[error("cloud error [{action}]: {message}")]
    Cloud {
        /// API action that failed (e.g. "RunInstances")
        action: String,
        /// Description of what failed
        message: String,
    },

    /// Instances exist in the cloud but never became usable
    #[error(
        "instances [{}] were created but are not ready: {source}",
        .instance_ids.join(", ")
    )]
    InstancesNotReady {
        /// IDs the create call returned
        instance_ids: Vec<String>,
        /// Underlying cause
        source: Box<Error>,
    },

    /// Remote command failed on a host
    #[error("remote command on {host} failed: {message}")]
    Remote {
        /// Host the command ran on
        host: String,
        /// Description of what failed
        message: String,
    },

    /// An operation exceeded its deadline
    #[error("{operation} timed out after {timeout_secs}s")]
    Timeout {
        /// Operation that was running
        operation: String,
        /// Deadline that expired
        timeout_secs: u64,
    },

    /// Local filesystem error
    #[error("io error [{context}]: {source}")]
    Io {
        /// What was being done (e.g. a path)
        context: String,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Configuration could not be loaded or is incomplete
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's wrong
        message: String,
    },
}

fn format_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: msg.into(),
        }
    }

    /// Create an unsupported version error
    pub fn unsupported_version(version: impl Into<String>) -> Self {
        Self::UnsupportedVersion {
            version: version.into(),
        }
    }

    /// Create a cloud API error for the given action
    pub fn cloud(action: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Cloud {
            action: action.into(),
            message: msg.into(),
        }
    }

    /// Create a cloud API error without a known action
    pub fn cloud_unknown(msg: impl Into<String>) -> Self {
        Self::cloud(UNKNOWN_CONTEXT, msg)
    }

    /// Create a remote execution error for a host
    pub fn remote(host: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Remote {
            host: host.into(),
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Name of the creation stage this error belongs to
    ///
    /// Collaborator errors that were never wrapped by a stage report
    /// [`UNKNOWN_CONTEXT`].
    pub fn stage(&self) -> &'static str {
        match self {
            Error::InvalidInput { .. }
            | Error::UnsupportedVersion { .. }
            | Error::UnsupportedCni { .. }
            | Error::MissingPodCidr => "validation",
            Error::SshKeyPreparationFailed { .. } => "key",
            Error::TagOperationFailed { .. } | Error::TagAssociationFailed { .. } => "tag",
            Error::ProvisioningFailed { .. } => "provisioning",
            Error::BootstrapExecutionFailed { .. } | Error::JoinDirectiveNotFound { .. } => {
                "bootstrap"
            }
            Error::CniApplyFailed { .. } => "cni",
            Error::NodeJoinFailed { .. } => "join",
            Error::CredentialExportFailed { .. } => "export",
            Error::ClusterNotFound { .. } | Error::DeletionFailed { .. } => "delete",
            Error::Cloud { .. }
            | Error::InstancesNotReady { .. }
            | Error::Remote { .. }
            | Error::Timeout { .. }
            | Error::Io { .. }
            | Error::Config { .. } => UNKNOWN_CONTEXT,
        }
    }

    /// Instance IDs that exist in the cloud but belong to a failed run
    pub fn created_instances(&self) -> &[String] {
        match self {
            Error::ProvisioningFailed {
                created_instances, ..
            } => created_instances,
            Error::InstancesNotReady { instance_ids, .. } => instance_ids,
            _ => &[],
        }
    }

    /// Whether this error, or the cause it wraps, is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::SshKeyPreparationFailed { source }
            | Error::TagOperationFailed { source, .. }
            | Error::TagAssociationFailed { source, .. }
            | Error::BootstrapExecutionFailed { source, .. }
            | Error::CniApplyFailed { source, .. }
            | Error::NodeJoinFailed { source, .. }
            | Error::CredentialExportFailed { source, .. }
            | Error::InstancesNotReady { source, .. }
            | Error::DeletionFailed { source, .. } => source.is_timeout(),
            Error::ProvisioningFailed { errors, .. } => errors.iter().any(Error::is_timeout),
            _ => false,
        }
    }
}
