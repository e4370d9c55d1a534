//! QingCloud IaaS API client
//!
//! A thin signed-GET client over the actions qkube needs. Asynchronous
//! actions (`RunInstances`, `TerminateInstances`) return a job ID that is
//! polled with `DescribeJobs` until it succeeds, fails, or the job deadline
//! passes. A non-zero `ret_code` in any response becomes [`Error::Cloud`].

mod services;
mod signer;
mod types;

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::debug;

use qkube_common::{Error, Result};

use crate::config::CloudConfig;
use types::{ApiEnvelope, DescribeInstancesResponse, DescribeJobsResponse, InstanceItem};

/// Per-request HTTP timeout
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between job status polls
const DEFAULT_JOB_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default deadline for one asynchronous job
const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(300);

/// Page size for list actions
const PAGE_LIMIT: usize = 100;

/// Room left for the create request itself inside a caller's deadline
const REQUEST_HEADROOM: Duration = Duration::from_secs(60);

/// Signed client for one zone
#[derive(Debug, Clone)]
pub struct QingCloudClient {
    http: reqwest::Client,
    config: CloudConfig,
    zone: String,
    job_poll_interval: Duration,
    job_timeout: Duration,
}

impl QingCloudClient {
    /// Create a client for `zone`
    pub fn new(config: CloudConfig, zone: impl Into<String>) -> Result<Self> {
        let zone = zone.into();
        if zone.trim().is_empty() {
            return Err(Error::config("zone must not be empty"));
        }
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            zone,
            job_poll_interval: DEFAULT_JOB_POLL_INTERVAL,
            job_timeout: DEFAULT_JOB_TIMEOUT,
        })
    }

    /// Override job polling cadence and deadline
    pub fn with_job_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.job_poll_interval = interval;
        self.job_timeout = timeout;
        self
    }

    /// Keep instance readiness waits inside a caller's per-call deadline
    ///
    /// A wait that expires here still reports the instance IDs it created,
    /// which a cancelled call cannot.
    pub fn within_deadline(mut self, deadline: Duration) -> Self {
        let budget = deadline
            .checked_sub(REQUEST_HEADROOM)
            .filter(|budget| !budget.is_zero())
            .unwrap_or(deadline / 2);
        self.job_timeout = self.job_timeout.min(budget);
        self
    }

    /// Zone every request targets
    pub fn zone(&self) -> &str {
        &self.zone
    }

    fn base_params(&self, action: &str, timestamp: &str) -> Vec<(String, String)> {
        vec![
            ("action".to_string(), action.to_string()),
            ("zone".to_string(), self.zone.clone()),
            (
                "access_key_id".to_string(),
                self.config.qy_access_key_id.clone(),
            ),
            ("time_stamp".to_string(), timestamp.to_string()),
            ("version".to_string(), "1".to_string()),
            ("signature_method".to_string(), "HmacSHA256".to_string()),
            ("signature_version".to_string(), "1".to_string()),
        ]
    }

    fn request_url(
        &self,
        action: &str,
        params: Vec<(String, String)>,
        timestamp: &str,
    ) -> Result<String> {
        let mut all = self.base_params(action, timestamp);
        all.extend(params);
        let query = signer::signed_query(
            &self.config.qy_secret_access_key,
            &self.config.api_path(),
            &all,
        )?;
        Ok(format!("{}?{}", self.config.endpoint(), query))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: Vec<(String, String)>,
    ) -> Result<T> {
        let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
        let url = self.request_url(action, params, &timestamp)?;

        debug!(action, zone = %self.zone, "Calling QingCloud API");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::cloud(action, format!("request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::cloud(action, format!("failed to read response: {}", e)))?;
        if !status.is_success() {
            return Err(Error::cloud(action, format!("HTTP {}: {}", status, body)));
        }
        parse_response(action, &body)
    }

    /// Poll a job until it succeeds
    async fn wait_job(&self, job_id: &str) -> Result<()> {
        let start = Instant::now();
        loop {
            let resp: DescribeJobsResponse = self
                .call("DescribeJobs", indexed("jobs", &[job_id.to_string()]))
                .await?;
            let job = resp
                .job_set
                .into_iter()
                .find(|j| j.job_id == job_id)
                .ok_or_else(|| Error::cloud("DescribeJobs", format!("job {} not found", job_id)))?;

            match job.status.as_str() {
                "successful" => return Ok(()),
                "failed" | "done with failure" => {
                    return Err(Error::cloud(
                        "DescribeJobs",
                        format!("job {} finished with status {}", job_id, job.status),
                    ))
                }
                status => debug!(job_id, status, "Waiting for job"),
            }

            if start.elapsed() > self.job_timeout {
                return Err(Error::timeout(format!("job {}", job_id), self.job_timeout));
            }
            tokio::time::sleep(self.job_poll_interval).await;
        }
    }

    /// Describe instances until every one reports a private address
    ///
    /// Results keep the order of `ids`.
    async fn wait_for_addresses(&self, ids: &[String]) -> Result<Vec<(String, String)>> {
        let start = Instant::now();
        loop {
            let mut params = indexed("instances", ids);
            params.push(("verbose".to_string(), "1".to_string()));
            let resp: DescribeInstancesResponse = self.call("DescribeInstances", params).await?;

            if let Some(addresses) = addresses_in_order(ids, &resp.instance_set) {
                return Ok(addresses);
            }
            if start.elapsed() > self.job_timeout {
                return Err(Error::timeout(
                    format!("private addresses for {}", ids.join(",")),
                    self.job_timeout,
                ));
            }
            debug!(count = ids.len(), "Waiting for instance addresses");
            tokio::time::sleep(self.job_poll_interval).await;
        }
    }
}

/// Check the envelope, then decode the action-specific body
pub(crate) fn parse_response<T: DeserializeOwned>(action: &str, body: &str) -> Result<T> {
    let envelope: ApiEnvelope = serde_json::from_str(body)
        .map_err(|e| Error::cloud(action, format!("malformed response: {}", e)))?;
    if envelope.ret_code != 0 {
        return Err(Error::cloud(
            action,
            format!(
                "ret_code {}: {}",
                envelope.ret_code,
                envelope.message.unwrap_or_default()
            ),
        ));
    }
    serde_json::from_str(body)
        .map_err(|e| Error::cloud(action, format!("unexpected response body: {}", e)))
}

/// `prefix.1=v1, prefix.2=v2, ...`
pub(crate) fn indexed(prefix: &str, values: &[String]) -> Vec<(String, String)> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| (format!("{}.{}", prefix, i + 1), v.clone()))
        .collect()
}

/// `(id, ip)` for each requested ID, or `None` while any is still missing
fn addresses_in_order(ids: &[String], items: &[InstanceItem]) -> Option<Vec<(String, String)>> {
    ids.iter()
        .map(|id| {
            items
                .iter()
                .find(|item| &item.instance_id == id)
                .and_then(InstanceItem::private_ip)
                .map(|ip| (id.clone(), ip.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::types::{CreateTagResponse, RunInstancesResponse};

    fn client() -> QingCloudClient {
        QingCloudClient::new(CloudConfig::new("AKID", "SECRET"), "pek3b").unwrap()
    }

    #[test]
    fn empty_zone_is_rejected() {
        assert!(QingCloudClient::new(CloudConfig::new("A", "B"), " ").is_err());
    }

    #[test]
    fn job_waits_fit_inside_the_call_deadline() {
        let default = client().within_deadline(Duration::from_secs(600));
        assert_eq!(default.job_timeout, DEFAULT_JOB_TIMEOUT);

        let tight = client().within_deadline(Duration::from_secs(120));
        assert_eq!(tight.job_timeout, Duration::from_secs(60));

        let tiny = client().within_deadline(Duration::from_secs(40));
        assert_eq!(tiny.job_timeout, Duration::from_secs(20));
    }

    #[test]
    fn request_url_is_signed_and_scoped_to_zone() {
        let url = client()
            .request_url(
                "DescribeTags",
                vec![("search_word".to_string(), "K8S-Cluster-demo".to_string())],
                "2019-08-01T10:00:00Z",
            )
            .unwrap();

        assert!(url.starts_with("https://api.qingcloud.com:443/iaas/?"));
        assert!(url.contains("access_key_id=AKID&action=DescribeTags"));
        assert!(url.contains("&zone=pek3b&signature="));
        assert!(url.contains("signature_method=HmacSHA256"));
        assert!(url.contains("search_word=K8S-Cluster-demo"));
        assert!(!url.contains("SECRET"));
    }

    #[test]
    fn parse_response_rejects_nonzero_ret_code() {
        let err = parse_response::<CreateTagResponse>(
            "CreateTag",
            r#"{"action":"CreateTagResponse","ret_code":1400,"message":"PermissionDenied"}"#,
        )
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("CreateTag"));
        assert!(msg.contains("1400"));
        assert!(msg.contains("PermissionDenied"));
    }

    #[test]
    fn parse_response_decodes_body() {
        let resp: RunInstancesResponse = parse_response(
            "RunInstances",
            r#"{"action":"RunInstancesResponse","instances":["i-a","i-b"],"job_id":"j-1","ret_code":0}"#,
        )
        .unwrap();
        assert_eq!(resp.instances, ["i-a", "i-b"]);
        assert_eq!(resp.job_id.as_deref(), Some("j-1"));
    }

    #[test]
    fn parse_response_rejects_garbage() {
        assert!(parse_response::<CreateTagResponse>("CreateTag", "<html>").is_err());
    }

    #[test]
    fn indexed_params_start_at_one() {
        let params = indexed("instances", &["i-a".to_string(), "i-b".to_string()]);
        assert_eq!(
            params,
            [
                ("instances.1".to_string(), "i-a".to_string()),
                ("instances.2".to_string(), "i-b".to_string()),
            ]
        );
    }

    #[test]
    fn addresses_follow_requested_order() {
        let resp: DescribeInstancesResponse = serde_json::from_str(
            r#"{"ret_code":0,"total_count":2,"instance_set":[
                {"instance_id":"i-b","status":"running","vxnets":[{"vxnet_id":"vxnet-1","private_ip":"10.0.0.3"}]},
                {"instance_id":"i-a","status":"running","vxnets":[{"vxnet_id":"vxnet-1","private_ip":"10.0.0.2"}]}
            ]}"#,
        )
        .unwrap();
        let ids = ["i-a".to_string(), "i-b".to_string()];

        let addresses = addresses_in_order(&ids, &resp.instance_set).unwrap();
        assert_eq!(
            addresses,
            [
                ("i-a".to_string(), "10.0.0.2".to_string()),
                ("i-b".to_string(), "10.0.0.3".to_string()),
            ]
        );
    }

    #[test]
    fn addresses_wait_for_missing_ip() {
        let resp: DescribeInstancesResponse = serde_json::from_str(
            r#"{"ret_code":0,"instance_set":[
                {"instance_id":"i-a","status":"pending","vxnets":[{"vxnet_id":"vxnet-1","private_ip":""}]}
            ]}"#,
        )
        .unwrap();
        assert!(addresses_in_order(&["i-a".to_string()], &resp.instance_set).is_none());
        assert!(addresses_in_order(&["i-z".to_string()], &resp.instance_set).is_none());
    }
}
