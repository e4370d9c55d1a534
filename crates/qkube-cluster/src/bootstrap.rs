//! kubeadm command templating and join directive extraction
//!
//! Everything here is pure string work, so the bring-up protocol can be
//! tested without hosts:
//! - [`kubeadm_init_command`] builds the control plane init command
//! - [`extract_join_directive`] recovers `kubeadm join ...` from init output
//! - [`cni_apply_command`] applies the plugin manifests shipped on the image

use std::fmt;
use std::str::FromStr;

use qkube_common::{Error, Result};

use crate::request::NetworkOptions;

/// Marker that starts the join command in `kubeadm init` output
pub const JOIN_MARKER: &str = "kubeadm join";

/// Swap must be off before kubelet starts
pub const SWAP_OFF: &str = "swapoff -a";

/// Supported network plugins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CniPlugin {
    /// Project Calico
    Calico,
    /// CoreOS Flannel
    Flannel,
}

impl CniPlugin {
    /// Name used on the command line and as the manifest folder
    pub fn as_str(&self) -> &'static str {
        match self {
            CniPlugin::Calico => "calico",
            CniPlugin::Flannel => "flannel",
        }
    }
}

impl fmt::Display for CniPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CniPlugin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "calico" => Ok(CniPlugin::Calico),
            "flannel" => Ok(CniPlugin::Flannel),
            other => Err(Error::UnsupportedCni {
                plugin: other.to_string(),
            }),
        }
    }
}

/// Build the `kubeadm init` command for the master
///
/// The CIDR is checked before the plugin, so an empty CIDR always reports
/// `MissingPodCidr`.
pub fn kubeadm_init_command(network: &NetworkOptions, version: &str) -> Result<String> {
    if network.pod_cidr.trim().is_empty() {
        return Err(Error::MissingPodCidr);
    }
    network.cni_plugin.parse::<CniPlugin>()?;
    Ok(format!(
        "kubeadm init --pod-network-cidr={} --kubernetes-version=v{}",
        network.pod_cidr.trim(),
        version
    ))
}

/// Prefix a command with [`SWAP_OFF`]
pub fn with_swap_off(command: &str) -> String {
    format!("{}; {}", SWAP_OFF, command)
}

/// `kubectl apply` of `<manifest_path>/<plugin>/` using the admin kubeconfig
pub fn cni_apply_command(admin_kubeconfig: &str, manifest_path: &str, plugin: CniPlugin) -> String {
    format!(
        "kubectl --kubeconfig={} apply -f {}/{}/",
        admin_kubeconfig,
        manifest_path.trim_end_matches('/'),
        plugin
    )
}

/// Print a remote file
pub fn read_file_command(path: &str) -> String {
    format!("cat {}", path)
}

/// Take the join command from `kubeadm init` output
///
/// Returns the trimmed output from the last [`JOIN_MARKER`] onward. Fails
/// with `JoinDirectiveNotFound` when the marker is absent or has nothing
/// after it.
pub fn extract_join_directive(output: &str) -> Result<String> {
    let not_found = || Error::JoinDirectiveNotFound {
        marker: JOIN_MARKER.to_string(),
    };

    let output = output.trim();
    let start = output.rfind(JOIN_MARKER).ok_or_else(not_found)?;
    let directive = output[start..].trim_end();
    if directive.len() == JOIN_MARKER.len() {
        return Err(not_found());
    }
    Ok(directive.to_string())
}
