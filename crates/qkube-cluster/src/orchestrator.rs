//! Cluster creation and deletion
//!
//! [`ClusterOrchestrator::create_cluster`] brings a cluster up in fixed steps:
//!
//! 1. Resolve (or create) the cluster tag
//! 2. Prepare the shared SSH key pair
//! 3. Create the master and the nodes concurrently, then wait for both
//! 4. Tag every created instance
//! 5. `kubeadm init` on the master and extract the join command
//! 6. Apply the CNI manifests on the master
//! 7. Join nodes one at a time, in provisioning order
//! 8. Optionally copy the admin kubeconfig to the local machine
//!
//! Every step is fatal. Nothing is rolled back; the errors carry the IDs
//! needed for manual cleanup. Each cloud and remote call runs under a
//! deadline from [`OrchestratorConfig`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use qkube_cloud::{
    CreateInstancesOptions, Instance, InstanceService, KeyPairService, Role, TagService,
};
use qkube_common::{
    cluster_tag_name, Error, Preset, PresetCatalog, Result, ADMIN_KUBECONFIG_PATH,
    LOCAL_KUBECONFIG_FILE, SSH_KEY_NAME,
};

use crate::bootstrap::{
    cni_apply_command, extract_join_directive, kubeadm_init_command, read_file_command,
    with_swap_off, CniPlugin,
};
use crate::local;
use crate::remote::RemoteExecutor;
use crate::request::ClusterCreationRequest;

/// Default deadline for one cloud call, including job and address waits
pub const DEFAULT_CLOUD_TIMEOUT: Duration = Duration::from_secs(600);

/// Default deadline for one remote command
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(900);

/// Port the API server listens on after `kubeadm init`
pub const API_SERVER_PORT: u16 = 6443;

/// Tunables for [`ClusterOrchestrator`]
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline for each cloud call
    pub cloud_timeout: Duration,
    /// Deadline for each remote command
    pub remote_timeout: Duration,
    /// Name of the key pair shared by all clusters
    pub ssh_key_name: String,
    /// Admin kubeconfig path on the master
    pub admin_kubeconfig_path: String,
    /// Public key uploaded when a key pair is created; `~/.ssh/id_rsa.pub` if unset
    pub public_key_path: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cloud_timeout: DEFAULT_CLOUD_TIMEOUT,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            ssh_key_name: SSH_KEY_NAME.to_string(),
            admin_kubeconfig_path: ADMIN_KUBECONFIG_PATH.to_string(),
            public_key_path: None,
        }
    }
}

/// A cluster that finished bring-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterEndpoint {
    /// Name the cluster was created with
    pub cluster_name: String,
    /// Tag grouping the cluster's instances
    pub tag_id: String,
    /// Control plane instance
    pub master: Instance,
    /// Worker nodes, in join order
    pub nodes: Vec<Instance>,
    /// Local kubeconfig, when exported
    pub kubeconfig: Option<PathBuf>,
}

impl ClusterEndpoint {
    /// API server URL on the master's private address
    pub fn api_server(&self) -> String {
        format!("https://{}:{}", self.master.ip, API_SERVER_PORT)
    }
}

/// What validation resolved for one run
struct Plan<'a> {
    preset: &'a Preset,
    plugin: CniPlugin,
    init_command: String,
}

/// Drives cluster creation against injected collaborators
pub struct ClusterOrchestrator {
    presets: Arc<PresetCatalog>,
    instances: Arc<dyn InstanceService>,
    tags: Arc<dyn TagService>,
    keys: Arc<dyn KeyPairService>,
    remote: Arc<dyn RemoteExecutor>,
    config: OrchestratorConfig,
}

impl ClusterOrchestrator {
    /// Create an orchestrator with default tunables
    pub fn new(
        presets: Arc<PresetCatalog>,
        instances: Arc<dyn InstanceService>,
        tags: Arc<dyn TagService>,
        keys: Arc<dyn KeyPairService>,
        remote: Arc<dyn RemoteExecutor>,
    ) -> Self {
        Self {
            presets,
            instances,
            tags,
            keys,
            remote,
            config: OrchestratorConfig::default(),
        }
    }

    /// Replace the tunables
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Current tunables
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Create a cluster and return its endpoint
    #[instrument(
        skip_all,
        fields(
            cluster = %request.cluster_name,
            version = %request.kubernetes_version,
            nodes = request.node_count
        )
    )]
    pub async fn create_cluster(&self, request: &ClusterCreationRequest) -> Result<ClusterEndpoint> {
        let start = Instant::now();
        let plan = self.plan(request)?;

        info!("[Step 1] Resolving cluster tag...");
        let tag_id = self.resolve_tag(&request.tag_name()).await?;

        info!("[Step 2] Preparing SSH key...");
        let key_id = self.prepare_ssh_key(request.use_existing_ssh_key).await?;

        info!(
            "[Step 3] Provisioning master and {} node(s)...",
            request.node_count
        );
        let (master, nodes) = self.provision(request, plan.preset, &key_id).await?;

        info!("[Step 4] Tagging instances...");
        self.tag_instances(&tag_id, &master, &nodes).await?;

        info!("[Step 5] Bootstrapping control plane on {}...", master.ip);
        let join_directive = self.bootstrap_master(&master, &plan.init_command).await?;

        info!("[Step 6] Applying {} network plugin...", plan.plugin);
        self.apply_cni(&master, plan.preset, plan.plugin).await?;

        info!("[Step 7] Joining {} node(s)...", nodes.len());
        self.join_nodes(&nodes, &join_directive).await?;

        let kubeconfig = if request.export_credentials {
            info!("[Step 8] Exporting kubeconfig...");
            Some(
                self.export_credentials(&master, &request.local_credential_path)
                    .await?,
            )
        } else {
            None
        };

        info!(
            master = %master.id,
            ip = %master.ip,
            "Cluster created in {:?}",
            start.elapsed()
        );
        Ok(ClusterEndpoint {
            cluster_name: request.cluster_name.clone(),
            tag_id,
            master,
            nodes,
            kubeconfig,
        })
    }

    /// Terminate every live instance tagged for `cluster_name`
    ///
    /// Returns the terminated IDs. The tag is kept so a later create with the
    /// same name reuses it.
    #[instrument(skip(self))]
    pub async fn delete_cluster(&self, cluster_name: &str) -> Result<Vec<String>> {
        let start = Instant::now();
        if cluster_name.trim().is_empty() {
            return Err(Error::invalid_input("cluster name must not be empty"));
        }

        let tag_name = cluster_tag_name(cluster_name);
        let tag = with_deadline(
            self.config.cloud_timeout,
            "find cluster tag",
            self.tags.find_tag_by_name(&tag_name),
        )
        .await
        .map_err(|source| Error::TagOperationFailed {
            tag: tag_name.clone(),
            source: Box::new(source),
        })?
        .ok_or_else(|| Error::ClusterNotFound {
            cluster: cluster_name.to_string(),
        })?;

        let failed = |source: Error| Error::DeletionFailed {
            cluster: cluster_name.to_string(),
            source: Box::new(source),
        };
        let ids = with_deadline(
            self.config.cloud_timeout,
            "list cluster instances",
            self.instances.list_instances_by_tag(&tag.id),
        )
        .await
        .map_err(failed)?;

        if ids.is_empty() {
            info!(tag_id = %tag.id, "No live instances carry the cluster tag");
            return Ok(ids);
        }

        info!(instances = %ids.join(","), "Terminating instances...");
        with_deadline(
            self.config.cloud_timeout,
            "terminate instances",
            self.instances.terminate_instances(&ids),
        )
        .await
        .map_err(failed)?;

        info!(
            count = ids.len(),
            "Cluster deleted in {:?}",
            start.elapsed()
        );
        Ok(ids)
    }

    /// Validate the request before any cloud call
    ///
    /// Network options are checked here as well, so a bad CIDR or plugin
    /// never leaves instances behind.
    fn plan(&self, request: &ClusterCreationRequest) -> Result<Plan<'_>> {
        request.validate_fields()?;
        let preset = self.presets.resolve(&request.kubernetes_version)?;
        let init_command = kubeadm_init_command(&request.network, &preset.version)?;
        let plugin = request.network.cni_plugin.parse::<CniPlugin>()?;
        Ok(Plan {
            preset,
            plugin,
            init_command,
        })
    }

    async fn resolve_tag(&self, tag_name: &str) -> Result<String> {
        let failed = |source: Error| Error::TagOperationFailed {
            tag: tag_name.to_string(),
            source: Box::new(source),
        };

        let existing = with_deadline(
            self.config.cloud_timeout,
            "find cluster tag",
            self.tags.find_tag_by_name(tag_name),
        )
        .await
        .map_err(failed)?;
        if let Some(tag) = existing {
            info!(tag_id = %tag.id, tag = tag_name, "Reusing cluster tag");
            return Ok(tag.id);
        }

        let tag_id = with_deadline(
            self.config.cloud_timeout,
            "create cluster tag",
            self.tags.create_tag(tag_name),
        )
        .await
        .map_err(failed)?;
        info!(tag_id = %tag_id, tag = tag_name, "Created cluster tag");
        Ok(tag_id)
    }

    async fn prepare_ssh_key(&self, use_existing: bool) -> Result<String> {
        let failed = |source: Error| Error::SshKeyPreparationFailed {
            source: Box::new(source),
        };

        let key_path = match &self.config.public_key_path {
            Some(path) => path.clone(),
            None => local::default_public_key_path().map_err(failed)?,
        };
        let public_key = local::read_public_key(&key_path).await.map_err(failed)?;
        let name = self.config.ssh_key_name.as_str();

        if use_existing {
            let existing = with_deadline(
                self.config.cloud_timeout,
                "find key pair",
                self.keys.find_key_pair_by_name(name),
            )
            .await
            .map_err(failed)?;
            match existing {
                Some(id) if !id.trim().is_empty() => {
                    info!(key_id = %id, "Reusing key pair {}", name);
                    return Ok(id);
                }
                Some(_) => warn!("Key pair {} has an empty ID, creating a new one", name),
                None => debug!("Key pair {} not found, creating it", name),
            }
        }

        let key_id = with_deadline(
            self.config.cloud_timeout,
            "create key pair",
            self.keys.create_key_pair(name, &public_key),
        )
        .await
        .map_err(failed)?;
        info!(key_id = %key_id, path = %key_path.display(), "Created key pair {}", name);
        Ok(key_id)
    }

    /// Create master and nodes concurrently
    ///
    /// Both branches always run to completion; a failure in one does not
    /// cancel the other.
    async fn provision(
        &self,
        request: &ClusterCreationRequest,
        preset: &Preset,
        key_id: &str,
    ) -> Result<(Instance, Vec<Instance>)> {
        let options = |role: Role, count: u32| CreateInstancesOptions {
            name: request.cluster_name.clone(),
            vxnet: request.vxnet_id.clone(),
            count,
            role,
            preset: preset.clone(),
            instance_class: request.instance_class,
            ssh_key_id: key_id.to_string(),
        };
        let master_opts = options(Role::Master, 1);
        let node_opts = options(Role::Node, request.node_count);

        let master_branch = with_deadline(
            self.config.cloud_timeout,
            "create master instance",
            self.instances.create_instances(&master_opts),
        );
        let node_branch = async {
            if node_opts.count == 0 {
                return Ok(Vec::new());
            }
            with_deadline(
                self.config.cloud_timeout,
                "create node instances",
                self.instances.create_instances(&node_opts),
            )
            .await
        };

        let (master_result, node_result) = tokio::join!(master_branch, node_branch);
        let (master, nodes) = collect_provisioning(
            &request.cluster_name,
            master_result,
            node_result,
            request.node_count,
        )?;

        info!(master = %master.id, ip = %master.ip, "Master ready");
        for node in &nodes {
            info!(node = %node.id, ip = %node.ip, "Node ready");
        }
        Ok((master, nodes))
    }

    async fn tag_instances(&self, tag_id: &str, master: &Instance, nodes: &[Instance]) -> Result<()> {
        let ids: Vec<String> = std::iter::once(master)
            .chain(nodes)
            .map(|instance| instance.id.clone())
            .collect();

        with_deadline(
            self.config.cloud_timeout,
            "attach cluster tag",
            self.tags.attach_instances(tag_id, &ids),
        )
        .await
        .map_err(|source| Error::TagAssociationFailed {
            tag_id: tag_id.to_string(),
            source: Box::new(source),
        })?;
        debug!(tag_id, count = ids.len(), "Tagged instances");
        Ok(())
    }

    /// Run `kubeadm init` and return the join command it printed
    async fn bootstrap_master(&self, master: &Instance, init_command: &str) -> Result<String> {
        let output = with_deadline(
            self.config.remote_timeout,
            "kubeadm init",
            self.remote.run(&master.ip, &with_swap_off(init_command)),
        )
        .await
        .map_err(|source| Error::BootstrapExecutionFailed {
            master: master.id.clone(),
            source: Box::new(source),
        })?;

        let output = String::from_utf8_lossy(&output);
        debug!(master = %master.id, output = %output, "kubeadm init output");
        extract_join_directive(&output)
    }

    async fn apply_cni(&self, master: &Instance, preset: &Preset, plugin: CniPlugin) -> Result<()> {
        let command = cni_apply_command(
            &self.config.admin_kubeconfig_path,
            &preset.cni_manifest_path,
            plugin,
        );
        let output = with_deadline(
            self.config.remote_timeout,
            "apply CNI manifests",
            self.remote.run(&master.ip, &command),
        )
        .await
        .map_err(|source| Error::CniApplyFailed {
            plugin: plugin.to_string(),
            source: Box::new(source),
        })?;
        debug!(output = %String::from_utf8_lossy(&output), "kubectl apply output");
        Ok(())
    }

    /// Join nodes strictly in order, stopping at the first failure
    async fn join_nodes(&self, nodes: &[Instance], join_directive: &str) -> Result<()> {
        let command = with_swap_off(join_directive);
        let mut joined = Vec::with_capacity(nodes.len());

        for node in nodes {
            info!(node = %node.id, ip = %node.ip, "Joining node");
            let result = with_deadline(
                self.config.remote_timeout,
                "kubeadm join",
                self.remote.run(&node.ip, &command),
            )
            .await;

            if let Err(source) = result {
                return Err(Error::NodeJoinFailed {
                    node_id: node.id.clone(),
                    node_ip: node.ip.clone(),
                    joined,
                    source: Box::new(source),
                });
            }
            joined.push(node.id.clone());
        }
        debug!(count = joined.len(), "All nodes joined");
        Ok(())
    }

    async fn export_credentials(&self, master: &Instance, dir: &Path) -> Result<PathBuf> {
        let failed = |source: Error| Error::CredentialExportFailed {
            path: dir.join(LOCAL_KUBECONFIG_FILE).display().to_string(),
            source: Box::new(source),
        };

        let content = with_deadline(
            self.config.remote_timeout,
            "read admin kubeconfig",
            self.remote
                .run(&master.ip, &read_file_command(&self.config.admin_kubeconfig_path)),
        )
        .await
        .map_err(failed)?;

        let path = local::write_kubeconfig(dir, &content)
            .await
            .map_err(failed)?;
        info!(path = %path.display(), "Exported kubeconfig");
        Ok(path)
    }
}

/// Run `fut` under a deadline; expiry becomes [`Error::Timeout`]
async fn with_deadline<T, F>(deadline: Duration, operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(operation, deadline)),
    }
}

/// Combine the two provisioning branches
///
/// Any error, or a branch returning the wrong number of instances, fails the
/// whole phase. Created IDs are kept from successful branches and from
/// branch errors that report them.
fn collect_provisioning(
    cluster: &str,
    master: Result<Vec<Instance>>,
    nodes: Result<Vec<Instance>>,
    expected_nodes: u32,
) -> Result<(Instance, Vec<Instance>)> {
    let mut errors = Vec::new();
    let mut created_instances = Vec::new();

    let master = match master {
        Ok(mut instances) => {
            created_instances.extend(instances.iter().map(|i| i.id.clone()));
            if instances.len() == 1 {
                instances.pop()
            } else {
                errors.push(Error::cloud_unknown(format!(
                    "expected 1 master instance, got {}",
                    instances.len()
                )));
                None
            }
        }
        Err(e) => {
            created_instances.extend_from_slice(e.created_instances());
            errors.push(e);
            None
        }
    };

    let nodes = match nodes {
        Ok(instances) => {
            created_instances.extend(instances.iter().map(|i| i.id.clone()));
            if instances.len() == expected_nodes as usize {
                Some(instances)
            } else {
                errors.push(Error::cloud_unknown(format!(
                    "expected {} node instance(s), got {}",
                    expected_nodes,
                    instances.len()
                )));
                None
            }
        }
        Err(e) => {
            created_instances.extend_from_slice(e.created_instances());
            errors.push(e);
            None
        }
    };

    match (master, nodes) {
        (Some(master), Some(nodes)) if errors.is_empty() => Ok((master, nodes)),
        _ => Err(Error::ProvisioningFailed {
            cluster: cluster.to_string(),
            errors,
            created_instances,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use mockall::mock;
    use qkube_cloud::Tag;

    use crate::remote::MockRemoteExecutor;
    use crate::request::fixtures::demo_request;

    // Local mocks since the automock-generated ones only exist in
    // qkube-cloud's own test configuration
    mock! {
        pub Instances {}

        #[async_trait]
        impl InstanceService for Instances {
            async fn create_instances(&self, opts: &CreateInstancesOptions) -> Result<Vec<Instance>>;
            async fn list_instances_by_tag(&self, tag_id: &str) -> Result<Vec<String>>;
            async fn terminate_instances(&self, instance_ids: &[String]) -> Result<()>;
        }
    }

    mock! {
        pub Tags {}

        #[async_trait]
        impl TagService for Tags {
            async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>>;
            async fn create_tag(&self, name: &str) -> Result<String>;
            async fn attach_instances(&self, tag_id: &str, instance_ids: &[String]) -> Result<()>;
        }
    }

    mock! {
        pub Keys {}

        #[async_trait]
        impl KeyPairService for Keys {
            async fn find_key_pair_by_name(&self, name: &str) -> Result<Option<String>>;
            async fn create_key_pair(&self, name: &str, public_key: &str) -> Result<String>;
        }
    }

    const INIT_OUTPUT: &str = "[init] Using Kubernetes version: v1.15.2\n\
        Your Kubernetes control-plane has initialized successfully!\n\
        kubeadm join 10.0.0.2:6443 --token abc.def --discovery-token-ca-cert-hash sha256:00\n";

    const JOIN_COMMAND: &str =
        "swapoff -a; kubeadm join 10.0.0.2:6443 --token abc.def --discovery-token-ca-cert-hash sha256:00";

    /// Executor that records every call and fails on chosen hosts
    #[derive(Default)]
    struct ScriptedExecutor {
        calls: Mutex<Vec<(String, String)>>,
        failing_hosts: Vec<String>,
        init_output: Option<String>,
    }

    impl ScriptedExecutor {
        fn failing_on(hosts: &[&str]) -> Self {
            Self {
                failing_hosts: hosts.iter().map(|h| h.to_string()).collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn hosts(&self) -> Vec<String> {
            self.calls().into_iter().map(|(host, _)| host).collect()
        }
    }

    #[async_trait]
    impl RemoteExecutor for ScriptedExecutor {
        async fn run(&self, host: &str, command: &str) -> Result<Vec<u8>> {
            self.calls
                .lock()
                .unwrap()
                .push((host.to_string(), command.to_string()));
            if self.failing_hosts.iter().any(|h| h == host) {
                return Err(Error::remote(host, "exit status 1"));
            }
            if command.contains("kubeadm init") {
                let output = self.init_output.as_deref().unwrap_or(INIT_OUTPUT);
                return Ok(output.as_bytes().to_vec());
            }
            if command.starts_with("cat ") {
                return Ok(b"apiVersion: v1\nkind: Config\n".to_vec());
            }
            Ok(Vec::new())
        }
    }

    /// Executor that never answers within the deadline
    struct HangingExecutor;

    #[async_trait]
    impl RemoteExecutor for HangingExecutor {
        async fn run(&self, _host: &str, _command: &str) -> Result<Vec<u8>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    fn public_key_file() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "ssh-rsa AAAAB3Nza operator@laptop\n").unwrap();
        file
    }

    fn instances_for(opts: &CreateInstancesOptions) -> Vec<Instance> {
        match opts.role {
            Role::Master => vec![Instance::new("i-master", Role::Master, "10.0.0.2")],
            Role::Node => (0..opts.count)
                .map(|i| {
                    Instance::new(
                        format!("i-node{}", i + 1),
                        Role::Node,
                        format!("10.0.0.{}", i + 3),
                    )
                })
                .collect(),
        }
    }

    fn happy_instances() -> MockInstances {
        let mut instances = MockInstances::new();
        instances
            .expect_create_instances()
            .returning(|opts| Ok(instances_for(opts)));
        instances
    }

    fn existing_tag() -> MockTags {
        let mut tags = MockTags::new();
        tags.expect_find_tag_by_name().returning(|name| {
            Ok(Some(Tag {
                id: "tag-1".to_string(),
                name: name.to_string(),
            }))
        });
        tags.expect_create_tag().never();
        tags.expect_attach_instances().returning(|_, _| Ok(()));
        tags
    }

    fn new_key() -> MockKeys {
        let mut keys = MockKeys::new();
        keys.expect_find_key_pair_by_name().never();
        keys.expect_create_key_pair()
            .returning(|_, _| Ok("kp-new".to_string()));
        keys
    }

    fn orchestrator(
        instances: MockInstances,
        tags: MockTags,
        keys: MockKeys,
        remote: Arc<dyn RemoteExecutor>,
        key_file: &tempfile::NamedTempFile,
    ) -> ClusterOrchestrator {
        ClusterOrchestrator::new(
            Arc::new(PresetCatalog::builtin()),
            Arc::new(instances),
            Arc::new(tags),
            Arc::new(keys),
            remote,
        )
        .with_config(OrchestratorConfig {
            public_key_path: Some(key_file.path().to_path_buf()),
            ..Default::default()
        })
    }

    // =========================================================================
    // Happy path
    // =========================================================================

    /// Story: demo cluster with two flannel nodes comes up end to end
    #[tokio::test]
    async fn story_demo_cluster_is_created() {
        let key = public_key_file();
        let remote = Arc::new(ScriptedExecutor::default());

        let mut tags = MockTags::new();
        tags.expect_find_tag_by_name()
            .withf(|name| name == "K8S-Cluster-demo")
            .returning(|_| Ok(None));
        tags.expect_create_tag()
            .withf(|name| name == "K8S-Cluster-demo")
            .times(1)
            .returning(|_| Ok("tag-new".to_string()));
        tags.expect_attach_instances()
            .withf(|tag_id, ids| {
                tag_id == "tag-new" && ids == ["i-master", "i-node1", "i-node2"]
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let orch = orchestrator(happy_instances(), tags, new_key(), remote.clone(), &key);
        let endpoint = orch.create_cluster(&demo_request()).await.unwrap();

        assert_eq!(endpoint.tag_id, "tag-new");
        assert_eq!(endpoint.master.id, "i-master");
        assert_eq!(endpoint.api_server(), "https://10.0.0.2:6443");
        assert_eq!(endpoint.nodes.len(), 2);
        assert!(endpoint.kubeconfig.is_none());

        let calls = remote.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(
            calls[0],
            (
                "10.0.0.2".to_string(),
                "swapoff -a; kubeadm init --pod-network-cidr=10.244.0.0/16 --kubernetes-version=v1.15.2"
                    .to_string()
            )
        );
        assert_eq!(
            calls[1],
            (
                "10.0.0.2".to_string(),
                "kubectl --kubeconfig=/etc/kubernetes/admin.conf apply -f /root/CNI/flannel/"
                    .to_string()
            )
        );
        assert_eq!(calls[2], ("10.0.0.3".to_string(), JOIN_COMMAND.to_string()));
        assert_eq!(calls[3], ("10.0.0.4".to_string(), JOIN_COMMAND.to_string()));
    }

    #[tokio::test]
    async fn master_only_cluster_skips_node_creation() {
        let key = public_key_file();
        let remote = Arc::new(ScriptedExecutor::default());

        let mut instances = MockInstances::new();
        instances
            .expect_create_instances()
            .withf(|opts| opts.role == Role::Master && opts.count == 1)
            .times(1)
            .returning(|opts| Ok(instances_for(opts)));

        let request = ClusterCreationRequest {
            node_count: 0,
            ..demo_request()
        };
        let orch = orchestrator(instances, existing_tag(), new_key(), remote.clone(), &key);
        let endpoint = orch.create_cluster(&request).await.unwrap();

        assert!(endpoint.nodes.is_empty());
        assert_eq!(remote.hosts(), ["10.0.0.2", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn kubeconfig_is_exported_when_requested() {
        let key = public_key_file();
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(ScriptedExecutor::default());

        let request = ClusterCreationRequest {
            export_credentials: true,
            local_credential_path: dir.path().to_path_buf(),
            ..demo_request()
        };
        let orch = orchestrator(happy_instances(), existing_tag(), new_key(), remote.clone(), &key);
        let endpoint = orch.create_cluster(&request).await.unwrap();

        let path = endpoint.kubeconfig.unwrap();
        assert_eq!(path, dir.path().join("kubeconfig"));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "apiVersion: v1\nkind: Config\n"
        );
        let last = remote.calls().pop().unwrap();
        assert_eq!(
            last,
            (
                "10.0.0.2".to_string(),
                "cat /etc/kubernetes/admin.conf".to_string()
            )
        );
    }

    // =========================================================================
    // Validation
    // =========================================================================

    #[tokio::test]
    async fn empty_name_fails_before_any_cloud_call() {
        let key = public_key_file();
        let mut tags = MockTags::new();
        tags.expect_find_tag_by_name().never();
        let mut instances = MockInstances::new();
        instances.expect_create_instances().never();

        let request = ClusterCreationRequest {
            cluster_name: String::new(),
            ..demo_request()
        };
        let orch = orchestrator(
            instances,
            tags,
            MockKeys::new(),
            Arc::new(MockRemoteExecutor::new()),
            &key,
        );
        let err = orch.create_cluster(&request).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn unknown_version_is_named_in_error() {
        let key = public_key_file();
        let orch = orchestrator(
            MockInstances::new(),
            MockTags::new(),
            MockKeys::new(),
            Arc::new(MockRemoteExecutor::new()),
            &key,
        );

        for requested in ["1.99.0", "", " "] {
            let request = ClusterCreationRequest {
                kubernetes_version: requested.to_string(),
                ..demo_request()
            };
            match orch.create_cluster(&request).await {
                Err(Error::UnsupportedVersion { version }) => assert_eq!(version, requested),
                other => panic!("expected UnsupportedVersion for {requested:?}, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn bad_network_options_fail_before_provisioning() {
        let key = public_key_file();
        let cases = [
            ("weave", "10.244.0.0/16", "UnsupportedCni"),
            ("calico", "", "MissingPodCidr"),
            ("weave", "", "MissingPodCidr"),
        ];

        for (cni, cidr, expected) in cases {
            let mut instances = MockInstances::new();
            instances.expect_create_instances().never();
            let mut remote = MockRemoteExecutor::new();
            remote.expect_run().never();

            let mut request = demo_request();
            request.network.cni_plugin = cni.to_string();
            request.network.pod_cidr = cidr.to_string();

            let orch = orchestrator(instances, MockTags::new(), MockKeys::new(), Arc::new(remote), &key);
            let err = orch.create_cluster(&request).await.unwrap_err();
            let matched = match expected {
                "UnsupportedCni" => matches!(err, Error::UnsupportedCni { .. }),
                _ => matches!(err, Error::MissingPodCidr),
            };
            assert!(matched, "{cni}/{cidr:?}: got {err:?}");
        }
    }

    // =========================================================================
    // Tag and key preparation
    // =========================================================================

    #[tokio::test]
    async fn tag_lookup_failure_is_tag_operation_failed() {
        let key = public_key_file();
        let mut tags = MockTags::new();
        tags.expect_find_tag_by_name()
            .returning(|_| Err(Error::cloud("DescribeTags", "denied")));

        let orch = orchestrator(
            MockInstances::new(),
            tags,
            MockKeys::new(),
            Arc::new(MockRemoteExecutor::new()),
            &key,
        );
        let err = orch.create_cluster(&demo_request()).await.unwrap_err();
        match &err {
            Error::TagOperationFailed { tag, .. } => assert_eq!(tag, "K8S-Cluster-demo"),
            other => panic!("expected TagOperationFailed, got {other:?}"),
        }
        assert_eq!(err.stage(), "tag");
    }

    /// Story: two runs with the same name resolve the same tag
    #[tokio::test]
    async fn story_tag_resolution_is_idempotent() {
        let key = public_key_file();
        let orch = orchestrator(
            MockInstances::new(),
            existing_tag(),
            MockKeys::new(),
            Arc::new(MockRemoteExecutor::new()),
            &key,
        );

        let first = orch.resolve_tag("K8S-Cluster-demo").await.unwrap();
        let second = orch.resolve_tag("K8S-Cluster-demo").await.unwrap();
        assert_eq!(first, "tag-1");
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn existing_key_pair_is_reused() {
        let key = public_key_file();
        let mut keys = MockKeys::new();
        keys.expect_find_key_pair_by_name()
            .withf(|name| name == "DO_NOT_REMOVE_K8S_KEY")
            .returning(|_| Ok(Some("kp-shared".to_string())));
        keys.expect_create_key_pair().never();

        let orch = orchestrator(
            MockInstances::new(),
            MockTags::new(),
            keys,
            Arc::new(MockRemoteExecutor::new()),
            &key,
        );
        assert_eq!(orch.prepare_ssh_key(true).await.unwrap(), "kp-shared");
    }

    #[tokio::test]
    async fn missing_or_blank_key_pair_is_recreated() {
        for found in [None, Some(String::new())] {
            let key = public_key_file();
            let mut keys = MockKeys::new();
            keys.expect_find_key_pair_by_name()
                .returning(move |_| Ok(found.clone()));
            keys.expect_create_key_pair()
                .withf(|name, public_key| {
                    name == "DO_NOT_REMOVE_K8S_KEY"
                        && public_key == "ssh-rsa AAAAB3Nza operator@laptop"
                })
                .times(1)
                .returning(|_, _| Ok("kp-new".to_string()));

            let orch = orchestrator(
                MockInstances::new(),
                MockTags::new(),
                keys,
                Arc::new(MockRemoteExecutor::new()),
                &key,
            );
            assert_eq!(orch.prepare_ssh_key(true).await.unwrap(), "kp-new");
        }
    }

    #[tokio::test]
    async fn unreadable_public_key_fails_key_preparation() {
        let key = public_key_file();
        let mut orch = orchestrator(
            MockInstances::new(),
            MockTags::new(),
            MockKeys::new(),
            Arc::new(MockRemoteExecutor::new()),
            &key,
        );
        orch.config.public_key_path = Some(PathBuf::from("/nonexistent/id_rsa.pub"));

        let err = orch.prepare_ssh_key(false).await.unwrap_err();
        assert!(matches!(err, Error::SshKeyPreparationFailed { .. }));
    }

    // =========================================================================
    // Provisioning
    // =========================================================================

    /// Story: master succeeds, nodes fail; the run fails and keeps the master ID
    #[tokio::test]
    async fn story_partial_success_is_failure() {
        let key = public_key_file();
        let mut instances = MockInstances::new();
        instances.expect_create_instances().returning(|opts| match opts.role {
            Role::Master => Ok(instances_for(opts)),
            Role::Node => Err(Error::cloud("RunInstances", "quota exceeded")),
        });
        let mut tags = MockTags::new();
        tags.expect_find_tag_by_name()
            .returning(|_| Ok(Some(Tag { id: "tag-1".to_string(), name: String::new() })));
        tags.expect_attach_instances().never();
        let mut remote = MockRemoteExecutor::new();
        remote.expect_run().never();

        let orch = orchestrator(instances, tags, new_key(), Arc::new(remote), &key);
        let err = orch.create_cluster(&demo_request()).await.unwrap_err();

        match &err {
            Error::ProvisioningFailed {
                cluster,
                errors,
                created_instances,
            } => {
                assert_eq!(cluster, "demo");
                assert_eq!(errors.len(), 1);
                assert!(errors[0].to_string().contains("quota exceeded"));
                assert_eq!(created_instances, &["i-master".to_string()]);
            }
            other => panic!("expected ProvisioningFailed, got {other:?}"),
        }
    }

    /// Story: nodes were created but their job failed; their IDs still surface
    #[tokio::test]
    async fn story_unready_nodes_are_reported_for_cleanup() {
        let key = public_key_file();
        let mut instances = MockInstances::new();
        instances.expect_create_instances().returning(|opts| match opts.role {
            Role::Master => Ok(instances_for(opts)),
            Role::Node => Err(Error::InstancesNotReady {
                instance_ids: vec!["i-orphan1".to_string(), "i-orphan2".to_string()],
                source: Box::new(Error::cloud(
                    "DescribeJobs",
                    "job j-1 finished with status failed",
                )),
            }),
        });
        let mut tags = MockTags::new();
        tags.expect_find_tag_by_name()
            .returning(|_| Ok(Some(Tag { id: "tag-1".to_string(), name: String::new() })));
        tags.expect_attach_instances().never();

        let orch = orchestrator(instances, tags, new_key(), Arc::new(MockRemoteExecutor::new()), &key);
        let err = orch.create_cluster(&demo_request()).await.unwrap_err();

        assert_eq!(err.stage(), "provisioning");
        assert_eq!(err.created_instances(), ["i-master", "i-orphan1", "i-orphan2"]);
        assert!(err.to_string().contains("status failed"));
    }

    #[test]
    fn both_branch_errors_are_aggregated() {
        let err = collect_provisioning(
            "demo",
            Err(Error::cloud("RunInstances", "master boom")),
            Err(Error::cloud("RunInstances", "node boom")),
            2,
        )
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("2 error(s)"));
        assert!(msg.contains("master boom"));
        assert!(msg.contains("node boom"));
        assert!(err.created_instances().is_empty());
    }

    #[test]
    fn short_node_batch_is_failure() {
        let err = collect_provisioning(
            "demo",
            Ok(vec![Instance::new("i-master", Role::Master, "10.0.0.2")]),
            Ok(vec![Instance::new("i-node1", Role::Node, "10.0.0.3")]),
            2,
        )
        .unwrap_err();

        assert!(err.to_string().contains("expected 2 node instance(s), got 1"));
        assert_eq!(err.created_instances(), ["i-master", "i-node1"]);
    }

    #[tokio::test]
    async fn node_branch_timeout_is_a_provisioning_failure() {
        let key = public_key_file();
        let mut instances = MockInstances::new();
        instances.expect_create_instances().returning(|opts| match opts.role {
            Role::Master => Ok(instances_for(opts)),
            Role::Node => Err(Error::timeout("create node instances", DEFAULT_CLOUD_TIMEOUT)),
        });

        let orch = orchestrator(instances, existing_tag(), new_key(), Arc::new(MockRemoteExecutor::new()), &key);
        let err = orch.create_cluster(&demo_request()).await.unwrap_err();
        assert_eq!(err.stage(), "provisioning");
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn attach_failure_stops_before_bootstrap() {
        let key = public_key_file();
        let mut tags = MockTags::new();
        tags.expect_find_tag_by_name()
            .returning(|_| Ok(Some(Tag { id: "tag-1".to_string(), name: String::new() })));
        tags.expect_attach_instances()
            .returning(|_, _| Err(Error::cloud("AttachTags", "denied")));
        let mut remote = MockRemoteExecutor::new();
        remote.expect_run().never();

        let orch = orchestrator(happy_instances(), tags, new_key(), Arc::new(remote), &key);
        let err = orch.create_cluster(&demo_request()).await.unwrap_err();
        match err {
            Error::TagAssociationFailed { tag_id, .. } => assert_eq!(tag_id, "tag-1"),
            other => panic!("expected TagAssociationFailed, got {other:?}"),
        }
    }

    // =========================================================================
    // Bootstrap, CNI and join
    // =========================================================================

    #[tokio::test]
    async fn init_without_join_marker_fails() {
        let key = public_key_file();
        let remote = Arc::new(ScriptedExecutor {
            init_output: Some("[preflight] all checks passed\n".to_string()),
            ..Default::default()
        });

        let orch = orchestrator(happy_instances(), existing_tag(), new_key(), remote.clone(), &key);
        let err = orch.create_cluster(&demo_request()).await.unwrap_err();

        assert!(matches!(err, Error::JoinDirectiveNotFound { .. }));
        assert_eq!(remote.calls().len(), 1);
    }

    #[tokio::test]
    async fn init_failure_names_master() {
        let key = public_key_file();
        let remote = Arc::new(ScriptedExecutor::failing_on(&["10.0.0.2"]));

        let orch = orchestrator(happy_instances(), existing_tag(), new_key(), remote, &key);
        let err = orch.create_cluster(&demo_request()).await.unwrap_err();
        match err {
            Error::BootstrapExecutionFailed { master, .. } => assert_eq!(master, "i-master"),
            other => panic!("expected BootstrapExecutionFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cni_failure_stops_before_join() {
        let key = public_key_file();
        let mut remote = MockRemoteExecutor::new();
        remote
            .expect_run()
            .withf(|_, command| command.contains("kubeadm init"))
            .times(1)
            .returning(|_, _| Ok(INIT_OUTPUT.as_bytes().to_vec()));
        remote
            .expect_run()
            .withf(|_, command| command.starts_with("kubectl"))
            .times(1)
            .returning(|host, _| Err(Error::remote(host, "manifests missing")));
        remote
            .expect_run()
            .withf(|_, command| command.contains("kubeadm join"))
            .never();

        let orch = orchestrator(happy_instances(), existing_tag(), new_key(), Arc::new(remote), &key);
        let err = orch.create_cluster(&demo_request()).await.unwrap_err();
        match err {
            Error::CniApplyFailed { plugin, .. } => assert_eq!(plugin, "flannel"),
            other => panic!("expected CniApplyFailed, got {other:?}"),
        }
    }

    /// Story: nodes A, B, C; B fails, so C is never attempted
    #[tokio::test]
    async fn story_join_stops_at_first_failure() {
        let key = public_key_file();
        let remote = Arc::new(ScriptedExecutor::failing_on(&["10.0.0.4"]));
        let request = ClusterCreationRequest {
            node_count: 3,
            ..demo_request()
        };

        let orch = orchestrator(happy_instances(), existing_tag(), new_key(), remote.clone(), &key);
        let err = orch.create_cluster(&request).await.unwrap_err();

        match &err {
            Error::NodeJoinFailed {
                node_id,
                node_ip,
                joined,
                ..
            } => {
                assert_eq!(node_id, "i-node2");
                assert_eq!(node_ip, "10.0.0.4");
                assert_eq!(joined, &["i-node1".to_string()]);
            }
            other => panic!("expected NodeJoinFailed, got {other:?}"),
        }
        assert_eq!(
            remote.hosts(),
            ["10.0.0.2", "10.0.0.2", "10.0.0.3", "10.0.0.4"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn hung_remote_command_times_out_as_bootstrap_failure() {
        let key = public_key_file();
        let orch = orchestrator(
            happy_instances(),
            existing_tag(),
            new_key(),
            Arc::new(HangingExecutor),
            &key,
        )
        .with_config(OrchestratorConfig {
            remote_timeout: Duration::from_secs(5),
            public_key_path: Some(key.path().to_path_buf()),
            ..Default::default()
        });

        let err = orch.create_cluster(&demo_request()).await.unwrap_err();
        assert!(matches!(err, Error::BootstrapExecutionFailed { .. }));
        assert!(err.is_timeout());
        assert!(err.to_string().contains("kubeadm init timed out after 5s"));
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    #[tokio::test]
    async fn delete_terminates_tagged_instances() {
        let key = public_key_file();
        let mut instances = MockInstances::new();
        instances
            .expect_list_instances_by_tag()
            .withf(|tag_id| tag_id == "tag-1")
            .returning(|_| Ok(vec!["i-master".to_string(), "i-node1".to_string()]));
        instances
            .expect_terminate_instances()
            .withf(|ids| ids == ["i-master", "i-node1"])
            .times(1)
            .returning(|_| Ok(()));

        let orch = orchestrator(
            instances,
            existing_tag(),
            MockKeys::new(),
            Arc::new(MockRemoteExecutor::new()),
            &key,
        );
        let ids = orch.delete_cluster("demo").await.unwrap();
        assert_eq!(ids, ["i-master", "i-node1"]);
    }

    #[tokio::test]
    async fn delete_of_empty_cluster_is_noop() {
        let key = public_key_file();
        let mut instances = MockInstances::new();
        instances
            .expect_list_instances_by_tag()
            .returning(|_| Ok(Vec::new()));
        instances.expect_terminate_instances().never();

        let orch = orchestrator(
            instances,
            existing_tag(),
            MockKeys::new(),
            Arc::new(MockRemoteExecutor::new()),
            &key,
        );
        assert!(orch.delete_cluster("demo").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_of_unknown_cluster_is_not_found() {
        let key = public_key_file();
        let mut tags = MockTags::new();
        tags.expect_find_tag_by_name().returning(|_| Ok(None));

        let orch = orchestrator(
            MockInstances::new(),
            tags,
            MockKeys::new(),
            Arc::new(MockRemoteExecutor::new()),
            &key,
        );
        match orch.delete_cluster("ghost").await {
            Err(Error::ClusterNotFound { cluster }) => assert_eq!(cluster, "ghost"),
            other => panic!("expected ClusterNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn terminate_failure_is_deletion_failed() {
        let key = public_key_file();
        let mut instances = MockInstances::new();
        instances
            .expect_list_instances_by_tag()
            .returning(|_| Ok(vec!["i-master".to_string()]));
        instances
            .expect_terminate_instances()
            .returning(|_| Err(Error::cloud("TerminateInstances", "denied")));

        let orch = orchestrator(
            instances,
            existing_tag(),
            MockKeys::new(),
            Arc::new(MockRemoteExecutor::new()),
            &key,
        );
        let err = orch.delete_cluster("demo").await.unwrap_err();
        assert!(matches!(err, Error::DeletionFailed { .. }));
        assert_eq!(err.stage(), "delete");
    }
}
