//! Cluster creation request

use std::path::PathBuf;

use qkube_common::{cluster_tag_name, Error, Result};

/// Pod networking for the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOptions {
    /// CNI plugin name as given by the user
    pub cni_plugin: String,
    /// Pod network CIDR passed to kubeadm
    pub pod_cidr: String,
}

/// Everything one `create_cluster` run needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterCreationRequest {
    /// Cluster name, also the tag identity
    pub cluster_name: String,
    /// Catalog key, e.g. "1.15.2"
    pub kubernetes_version: String,
    /// Worker node count; zero creates a master-only cluster
    pub node_count: u32,
    /// Pod networking
    pub network: NetworkOptions,
    /// Provider instance class
    pub instance_class: i32,
    /// Network segment for every instance
    pub vxnet_id: String,
    /// Zone the cloud client targets
    pub zone: String,
    /// Reuse the shared key pair when it already exists
    pub use_existing_ssh_key: bool,
    /// Copy the admin kubeconfig to the local machine
    pub export_credentials: bool,
    /// Local directory receiving `kubeconfig`
    pub local_credential_path: PathBuf,
}

impl ClusterCreationRequest {
    /// Name of the tag grouping this cluster's instances
    pub fn tag_name(&self) -> String {
        cluster_tag_name(&self.cluster_name)
    }

    /// Checks that need no catalog or cloud access
    ///
    /// The version is left to the catalog, which rejects blanks as unsupported.
    pub(crate) fn validate_fields(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            return Err(Error::invalid_input("cluster name must not be empty"));
        }
        if self.vxnet_id.trim().is_empty() {
            return Err(Error::invalid_input("vxnet must not be empty"));
        }
        if self.export_credentials && self.local_credential_path.as_os_str().is_empty() {
            return Err(Error::invalid_input(
                "a local credential path is required to export the kubeconfig",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// demo / 1.15.2 / 2 nodes / flannel / 10.244.0.0/16
    pub(crate) fn demo_request() -> ClusterCreationRequest {
        ClusterCreationRequest {
            cluster_name: "demo".to_string(),
            kubernetes_version: "1.15.2".to_string(),
            node_count: 2,
            network: NetworkOptions {
                cni_plugin: "flannel".to_string(),
                pod_cidr: "10.244.0.0/16".to_string(),
            },
            instance_class: 0,
            vxnet_id: "vxnet-0".to_string(),
            zone: "pek3b".to_string(),
            use_existing_ssh_key: false,
            export_credentials: false,
            local_credential_path: PathBuf::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::demo_request;
    use super::*;

    #[test]
    fn demo_request_is_valid() {
        let request = demo_request();
        assert!(request.validate_fields().is_ok());
        assert_eq!(request.tag_name(), "K8S-Cluster-demo");
    }

    #[test]
    fn blank_name_is_invalid_input() {
        for name in ["", "  "] {
            let request = ClusterCreationRequest {
                cluster_name: name.to_string(),
                ..demo_request()
            };
            assert!(matches!(
                request.validate_fields(),
                Err(Error::InvalidInput { .. })
            ));
        }
    }

    #[test]
    fn export_needs_a_directory() {
        let request = ClusterCreationRequest {
            export_credentials: true,
            ..demo_request()
        };
        let err = request.validate_fields().unwrap_err();
        assert!(err.to_string().contains("credential path"));

        let request = ClusterCreationRequest {
            export_credentials: true,
            local_credential_path: PathBuf::from("/tmp/demo"),
            ..demo_request()
        };
        assert!(request.validate_fields().is_ok());
    }
}
