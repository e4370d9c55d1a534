//! Response bodies of the API actions qkube calls

use serde::Deserialize;

/// Fields present on every response
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope {
    pub ret_code: i64,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RunInstancesResponse {
    #[serde(default)]
    pub instances: Vec<String>,
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobResponse {
    #[serde(default)]
    pub job_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DescribeJobsResponse {
    #[serde(default)]
    pub job_set: Vec<JobItem>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobItem {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DescribeInstancesResponse {
    #[serde(default)]
    pub instance_set: Vec<InstanceItem>,
    #[serde(default)]
    pub total_count: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InstanceItem {
    pub instance_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub vxnets: Vec<VxnetItem>,
}

impl InstanceItem {
    /// First private address, if the instance has one yet
    pub fn private_ip(&self) -> Option<&str> {
        self.vxnets
            .iter()
            .map(|v| v.private_ip.as_str())
            .find(|ip| !ip.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct VxnetItem {
    #[serde(default)]
    pub private_ip: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DescribeTagsResponse {
    #[serde(default)]
    pub tag_set: Vec<TagItem>,
    #[serde(default)]
    pub total_count: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TagItem {
    pub tag_id: String,
    pub tag_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateTagResponse {
    pub tag_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DescribeKeyPairsResponse {
    #[serde(default)]
    pub keypair_set: Vec<KeyPairItem>,
    #[serde(default)]
    pub total_count: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct KeyPairItem {
    pub keypair_id: String,
    pub keypair_name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateKeyPairResponse {
    pub keypair_id: String,
}
