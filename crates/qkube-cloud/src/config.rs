//! QingCloud credentials and endpoint configuration
//!
//! Read from the same YAML file the QingCloud SDKs use, by default
//! `~/.qingcloud/config.yaml`:
//!
//! ```yaml
//! qy_access_key_id: QYACCESSKEYIDEXAMPLE
//! qy_secret_access_key: SECRETACCESSKEY
//! zone: pek3b
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use qkube_common::{Error, Result};

const CONFIG_DIR_NAME: &str = ".qingcloud";
const CONFIG_FILE_NAME: &str = "config.yaml";

fn default_host() -> String {
    "api.qingcloud.com".to_string()
}

fn default_port() -> u16 {
    443
}

fn default_protocol() -> String {
    "https".to_string()
}

fn default_uri() -> String {
    "/iaas".to_string()
}

/// API credentials and endpoint
#[derive(Clone, Deserialize)]
pub struct CloudConfig {
    /// Access key ID
    pub qy_access_key_id: String,
    /// Secret used to sign requests
    pub qy_secret_access_key: String,
    /// Default zone when none is given on the command line
    #[serde(default)]
    pub zone: Option<String>,
    /// API host
    #[serde(default = "default_host")]
    pub host: String,
    /// API port
    #[serde(default = "default_port")]
    pub port: u16,
    /// `https` or `http`
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Path prefix of the IaaS API
    #[serde(default = "default_uri")]
    pub uri: String,
}

impl fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudConfig")
            .field("qy_access_key_id", &self.qy_access_key_id)
            .field("qy_secret_access_key", &"<redacted>")
            .field("zone", &self.zone)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .field("uri", &self.uri)
            .finish()
    }
}

impl CloudConfig {
    /// Create a config for the public API endpoint
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            qy_access_key_id: access_key_id.into(),
            qy_secret_access_key: secret_access_key.into(),
            zone: None,
            host: default_host(),
            port: default_port(),
            protocol: default_protocol(),
            uri: default_uri(),
        }
    }

    /// Parse and validate YAML config content
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: CloudConfig = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid cloud config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        Self::from_yaml(&yaml)
    }

    /// `~/.qingcloud/config.yaml`, if a home directory can be determined
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    fn validate(&self) -> Result<()> {
        if self.qy_access_key_id.trim().is_empty() {
            return Err(Error::config("qy_access_key_id is empty"));
        }
        if self.qy_secret_access_key.trim().is_empty() {
            return Err(Error::config("qy_secret_access_key is empty"));
        }
        if self.protocol != "https" && self.protocol != "http" {
            return Err(Error::config(format!(
                "protocol must be http or https, got {}",
                self.protocol
            )));
        }
        Ok(())
    }

    /// Signed path of the API, always ending with `/`
    pub fn api_path(&self) -> String {
        format!("{}/", self.uri.trim_end_matches('/'))
    }

    /// Base URL requests are sent to
    pub fn endpoint(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.protocol,
            self.host,
            self.port,
            self.api_path()
        )
    }
}
