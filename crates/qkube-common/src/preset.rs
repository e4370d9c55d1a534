//! Kubernetes version presets
//!
//! A [`Preset`] bundles the machine images and sizing for one supported
//! Kubernetes version. The [`PresetCatalog`] is built once at startup, either
//! from the built-in table or from a YAML file, and handed to the orchestrator
//! behind an `Arc`. Lookups are by exact version string.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Directory on the images that holds one manifest folder per CNI plugin
pub const DEFAULT_CNI_MANIFEST_PATH: &str = "/root/CNI";

/// Image and sizing metadata for one Kubernetes version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preset {
    /// Kubernetes version without the leading `v` (e.g. "1.15.2")
    pub version: String,
    /// Image the master instance boots from
    pub master_image_id: String,
    /// Image worker nodes boot from
    pub node_image_id: String,
    /// Master vCPU count
    pub master_cpu: u32,
    /// Master memory in MiB
    pub master_memory: u32,
    /// Node vCPU count
    pub node_cpu: u32,
    /// Node memory in MiB
    pub node_memory: u32,
    /// Directory on the master holding `<plugin>/` manifest folders
    #[serde(default = "default_cni_manifest_path")]
    pub cni_manifest_path: String,
}

fn default_cni_manifest_path() -> String {
    DEFAULT_CNI_MANIFEST_PATH.to_string()
}

#[derive(Debug, Deserialize)]
struct PresetFile {
    presets: Vec<Preset>,
}

/// Read-only lookup from Kubernetes version to [`Preset`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetCatalog {
    presets: BTreeMap<String, Preset>,
}

impl PresetCatalog {
    /// The images published for qkube
    pub fn builtin() -> Self {
        let presets = [
            Preset {
                version: "1.13.1".to_string(),
                master_image_id: "img-ybttnmjg".to_string(),
                node_image_id: "img-rfubqmqn".to_string(),
                master_cpu: 4,
                master_memory: 4096,
                node_cpu: 4,
                node_memory: 4096,
                cni_manifest_path: DEFAULT_CNI_MANIFEST_PATH.to_string(),
            },
            Preset {
                version: "1.15.2".to_string(),
                master_image_id: "img-79giiut8".to_string(),
                node_image_id: "img-kp1kue0l".to_string(),
                master_cpu: 4,
                master_memory: 4096,
                node_cpu: 4,
                node_memory: 4096,
                cni_manifest_path: DEFAULT_CNI_MANIFEST_PATH.to_string(),
            },
        ];

        Self {
            presets: presets
                .into_iter()
                .map(|p| (p.version.clone(), p))
                .collect(),
        }
    }

    /// Build a catalog from explicit presets
    ///
    /// Rejects empty versions, duplicate versions and an empty list.
    pub fn from_presets(presets: impl IntoIterator<Item = Preset>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for preset in presets {
            if preset.version.trim().is_empty() {
                return Err(Error::config("preset with empty version"));
            }
            if preset.master_image_id.is_empty() || preset.node_image_id.is_empty() {
                return Err(Error::config(format!(
                    "preset {} is missing an image id",
                    preset.version
                )));
            }
            let version = preset.version.clone();
            if map.insert(version.clone(), preset).is_some() {
                return Err(Error::config(format!("duplicate preset for {}", version)));
            }
        }
        if map.is_empty() {
            return Err(Error::config("preset catalog is empty"));
        }
        Ok(Self { presets: map })
    }

    /// Parse a catalog from YAML of the form `presets: [ ... ]`
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let file: PresetFile = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid preset file: {}", e)))?;
        Self::from_presets(file.presets)
    }

    /// Load a catalog from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        let catalog = Self::from_yaml(&yaml)?;
        debug!(path = %path.display(), count = catalog.len(), "Loaded presets");
        Ok(catalog)
    }

    /// Look up a preset by exact version
    pub fn get(&self, version: &str) -> Option<&Preset> {
        self.presets.get(version)
    }

    /// Look up a preset, failing with `UnsupportedVersion` if absent
    pub fn resolve(&self, version: &str) -> Result<&Preset> {
        self.get(version)
            .ok_or_else(|| Error::unsupported_version(version))
    }

    /// Supported versions in ascending string order
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    /// All presets in version order
    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.values()
    }

    /// Number of presets
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    /// Whether the catalog has no presets
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
