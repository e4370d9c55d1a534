//! Collaborator trait implementations for [`QingCloudClient`]

use async_trait::async_trait;
use tracing::{debug, info};

use qkube_common::{Error, Result};

use super::types::{
    CreateKeyPairResponse, CreateTagResponse, DescribeInstancesResponse,
    DescribeKeyPairsResponse, DescribeTagsResponse, JobResponse, RunInstancesResponse,
};
use super::{indexed, QingCloudClient, PAGE_LIMIT};
use crate::instance::{CreateInstancesOptions, Instance, InstanceService};
use crate::keypair::KeyPairService;
use crate::tag::{Tag, TagService};

/// Instance states that still hold resources
const LIVE_STATES: &[&str] = &["pending", "running", "stopped", "suspended"];

fn param(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

/// Offset of the next page, or `None` once `total` items were seen
fn next_offset(offset: usize, page_len: usize, total: usize) -> Option<usize> {
    let next = offset + page_len;
    (page_len > 0 && next < total).then_some(next)
}

impl QingCloudClient {
    /// Wait for the create job, then for every private address
    async fn wait_until_ready(
        &self,
        job_id: Option<&str>,
        ids: &[String],
    ) -> Result<Vec<(String, String)>> {
        if let Some(job_id) = job_id {
            self.wait_job(job_id).await?;
        }
        self.wait_for_addresses(ids).await
    }
}

#[async_trait]
impl InstanceService for QingCloudClient {
    async fn create_instances(&self, opts: &CreateInstancesOptions) -> Result<Vec<Instance>> {
        if opts.count == 0 {
            return Ok(Vec::new());
        }

        let params = vec![
            param("image_id", opts.image_id()),
            param("cpu", opts.cpu()),
            param("memory", opts.memory()),
            param("count", opts.count),
            param("instance_name", opts.instance_name()),
            param("instance_class", opts.instance_class),
            param("login_mode", "keypair"),
            param("login_keypair", &opts.ssh_key_id),
            param("vxnets.1", &opts.vxnet),
        ];
        let resp: RunInstancesResponse = self.call("RunInstances", params).await?;
        let not_ready = |source: Error| Error::InstancesNotReady {
            instance_ids: resp.instances.clone(),
            source: Box::new(source),
        };
        if resp.instances.len() != opts.count as usize {
            return Err(not_ready(Error::cloud(
                "RunInstances",
                format!(
                    "requested {} {} instance(s), got {}",
                    opts.count,
                    opts.role,
                    resp.instances.len()
                ),
            )));
        }
        info!(
            role = %opts.role,
            instances = %resp.instances.join(","),
            "Instances requested"
        );

        let addresses = tokio::time::timeout(
            self.job_timeout,
            self.wait_until_ready(resp.job_id.as_deref(), &resp.instances),
        )
        .await
        .unwrap_or_else(|_| {
            Err(Error::timeout(
                format!("readiness of {}", resp.instances.join(",")),
                self.job_timeout,
            ))
        })
        .map_err(not_ready)?;

        Ok(addresses
            .into_iter()
            .map(|(id, ip)| Instance::new(id, opts.role, ip))
            .collect())
    }

    async fn list_instances_by_tag(&self, tag_id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut offset = 0;
        loop {
            let mut params = vec![
                param("tags.1", tag_id),
                param("limit", PAGE_LIMIT),
                param("offset", offset),
            ];
            for (i, state) in LIVE_STATES.iter().enumerate() {
                params.push(param(&format!("status.{}", i + 1), state));
            }

            let resp: DescribeInstancesResponse = self.call("DescribeInstances", params).await?;
            let page_len = resp.instance_set.len();
            ids.extend(
                resp.instance_set
                    .into_iter()
                    .filter(|item| LIVE_STATES.contains(&item.status.as_str()))
                    .map(|item| item.instance_id),
            );

            match next_offset(offset, page_len, resp.total_count) {
                Some(next) => offset = next,
                None => break,
            }
        }
        debug!(tag_id, count = ids.len(), "Listed tagged instances");
        Ok(ids)
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        let resp: JobResponse = self
            .call("TerminateInstances", indexed("instances", instance_ids))
            .await?;
        if let Some(job_id) = resp.job_id.as_deref() {
            self.wait_job(job_id).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TagService for QingCloudClient {
    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        let mut offset = 0;
        loop {
            let resp: DescribeTagsResponse = self
                .call(
                    "DescribeTags",
                    vec![
                        param("search_word", name),
                        param("limit", PAGE_LIMIT),
                        param("offset", offset),
                    ],
                )
                .await?;
            let page_len = resp.tag_set.len();
            // search_word is a substring match
            if let Some(tag) = resp.tag_set.into_iter().find(|t| t.tag_name == name) {
                return Ok(Some(Tag {
                    id: tag.tag_id,
                    name: tag.tag_name,
                }));
            }
            match next_offset(offset, page_len, resp.total_count) {
                Some(next) => offset = next,
                None => return Ok(None),
            }
        }
    }

    async fn create_tag(&self, name: &str) -> Result<String> {
        let resp: CreateTagResponse = self
            .call("CreateTag", vec![param("tag_name", name)])
            .await?;
        Ok(resp.tag_id)
    }

    async fn attach_instances(&self, tag_id: &str, instance_ids: &[String]) -> Result<()> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        let mut params = Vec::with_capacity(instance_ids.len() * 3);
        for (i, id) in instance_ids.iter().enumerate() {
            let prefix = format!("resource_tag_pairs.{}", i + 1);
            params.push(param(&format!("{}.tag_id", prefix), tag_id));
            params.push(param(&format!("{}.resource_type", prefix), "instance"));
            params.push(param(&format!("{}.resource_id", prefix), id));
        }
        let _: JobResponse = self.call("AttachTags", params).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyPairService for QingCloudClient {
    async fn find_key_pair_by_name(&self, name: &str) -> Result<Option<String>> {
        let mut offset = 0;
        loop {
            let resp: DescribeKeyPairsResponse = self
                .call(
                    "DescribeKeyPairs",
                    vec![
                        param("search_word", name),
                        param("limit", PAGE_LIMIT),
                        param("offset", offset),
                    ],
                )
                .await?;
            let page_len = resp.keypair_set.len();
            if let Some(key) = resp.keypair_set.into_iter().find(|k| k.keypair_name == name) {
                return Ok(Some(key.keypair_id));
            }
            match next_offset(offset, page_len, resp.total_count) {
                Some(next) => offset = next,
                None => return Ok(None),
            }
        }
    }

    async fn create_key_pair(&self, name: &str, public_key: &str) -> Result<String> {
        let resp: CreateKeyPairResponse = self
            .call(
                "CreateKeyPair",
                vec![
                    param("keypair_name", name),
                    param("mode", "user"),
                    param("public_key", public_key.trim()),
                ],
            )
            .await?;
        Ok(resp.keypair_id)
    }
}
