//! Remote command execution
//!
//! [`RemoteExecutor`] runs one command on a host and returns its captured
//! stdout. [`SshExecutor`] implements it by shelling out to the system `ssh`
//! client in batch mode, so authentication comes from the local agent or an
//! explicit identity file.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;
use tracing::debug;

use qkube_common::{Error, Result};

/// Run a shell command on a remote host
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run `command` on `host` and return its stdout
    ///
    /// A non-zero exit status is an error that includes stderr.
    async fn run(&self, host: &str, command: &str) -> Result<Vec<u8>>;
}

/// Connection settings for [`SshExecutor`]
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Login user on every host
    pub user: String,
    /// SSH port
    pub port: u16,
    /// Private key passed with `-i`; the agent/default keys are used if unset
    pub identity_file: Option<PathBuf>,
    /// TCP connect timeout
    pub connect_timeout: Duration,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// [`RemoteExecutor`] backed by the `ssh` binary
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    config: SshConfig,
}

impl SshExecutor {
    /// Create an executor with the given settings
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Arguments passed to `ssh` for one invocation
    ///
    /// Fresh instances have unknown host keys, so host key checking is off.
    fn args(&self, host: &str, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout.as_secs()),
            "-p".to_string(),
            self.config.port.to_string(),
        ];
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(format!("{}@{}", self.config.user, host));
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, host: &str, command: &str) -> Result<Vec<u8>> {
        debug!(host, command, "Running remote command");
        let output = Command::new("ssh")
            .args(self.args(host, command))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::remote(host, format!("failed to spawn ssh: {}", e)))?;

        if !output.status.success() {
            return Err(Error::remote(
                host,
                format!(
                    "command exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }
        if !output.stderr.is_empty() {
            debug!(host, stderr = %String::from_utf8_lossy(&output.stderr), "Remote stderr");
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_args_log_in_as_root_on_port_22() {
        let args = SshExecutor::default().args("10.0.0.2", "uptime");
        assert!(args.windows(2).any(|w| w == ["-p", "22"]));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=30".to_string()));
        assert!(!args.contains(&"-i".to_string()));
        assert_eq!(&args[args.len() - 3..], ["root@10.0.0.2", "--", "uptime"]);
    }

    #[test]
    fn identity_file_and_user_are_forwarded() {
        let executor = SshExecutor::new(SshConfig {
            user: "ubuntu".to_string(),
            port: 2222,
            identity_file: Some(PathBuf::from("/keys/id_rsa")),
            connect_timeout: Duration::from_secs(5),
        });
        let args = executor.args("node-1", "swapoff -a; kubeadm join x");
        assert!(args.windows(2).any(|w| w == ["-i", "/keys/id_rsa"]));
        assert!(args.windows(2).any(|w| w == ["-p", "2222"]));
        assert!(args.contains(&"ConnectTimeout=5".to_string()));
        assert_eq!(args.last().unwrap(), "swapoff -a; kubeadm join x");
        assert!(args.contains(&"ubuntu@node-1".to_string()));
    }

    #[tokio::test]
    async fn mock_executor_returns_output() {
        let mut mock = MockRemoteExecutor::new();
        mock.expect_run()
            .withf(|host, command| host == "10.0.0.1" && command == "hostname")
            .returning(|_, _| Ok(b"master\n".to_vec()));

        let out = mock.run("10.0.0.1", "hostname").await.unwrap();
        assert_eq!(out, b"master\n");
    }
}
