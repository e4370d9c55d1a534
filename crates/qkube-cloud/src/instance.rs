//! Compute instances

use std::fmt;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use qkube_common::{Preset, Result};

/// Role an instance plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Runs the control plane
    Master,
    /// Runs workloads
    Node,
}

impl Role {
    /// Lowercase name used in instance names and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Node => "node",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A created compute instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Cloud instance ID
    pub id: String,
    /// Role requested at creation
    pub role: Role,
    /// Private address reachable over SSH
    pub ip: String,
}

impl Instance {
    /// Create an instance record
    pub fn new(id: impl Into<String>, role: Role, ip: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            ip: ip.into(),
        }
    }
}

/// Parameters for one batch of instances sharing a role
#[derive(Debug, Clone)]
pub struct CreateInstancesOptions {
    /// Cluster name, used as the instance name prefix
    pub name: String,
    /// Network segment (VxNet) the instances attach to
    pub vxnet: String,
    /// Number of instances to create
    pub count: u32,
    /// Role of every instance in the batch
    pub role: Role,
    /// Image and sizing source
    pub preset: Preset,
    /// Provider instance class (performance tier)
    pub instance_class: i32,
    /// Key pair installed for root login
    pub ssh_key_id: String,
}

impl CreateInstancesOptions {
    /// Image for this batch's role
    pub fn image_id(&self) -> &str {
        match self.role {
            Role::Master => &self.preset.master_image_id,
            Role::Node => &self.preset.node_image_id,
        }
    }

    /// vCPU count for this batch's role
    pub fn cpu(&self) -> u32 {
        match self.role {
            Role::Master => self.preset.master_cpu,
            Role::Node => self.preset.node_cpu,
        }
    }

    /// Memory in MiB for this batch's role
    pub fn memory(&self) -> u32 {
        match self.role {
            Role::Master => self.preset.master_memory,
            Role::Node => self.preset.node_memory,
        }
    }

    /// Display name given to each instance
    pub fn instance_name(&self) -> String {
        format!("{}-{}", self.name, self.role)
    }
}

/// Instance lifecycle operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait InstanceService: Send + Sync {
    /// Create `opts.count` instances and wait until each has an address
    ///
    /// Returns one [`Instance`] per created unit, in provider order. The
    /// batch fails as a whole.
    async fn create_instances(&self, opts: &CreateInstancesOptions) -> Result<Vec<Instance>>;

    /// IDs of the live instances carrying a tag
    async fn list_instances_by_tag(&self, tag_id: &str) -> Result<Vec<String>>;

    /// Terminate instances in one batch
    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()>;
}
