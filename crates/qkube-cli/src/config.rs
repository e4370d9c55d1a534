//! Where the CLI finds its inputs
//!
//! The cloud config resolution chain (highest priority first):
//! 1. Explicit `--config` flag
//! 2. `QKUBE_CONFIG` environment variable
//! 3. `~/.qingcloud/config.yaml`
//!
//! Presets come from `--presets <file>` when given, otherwise the built-in
//! catalog.

use std::path::{Path, PathBuf};

use qkube_cloud::CloudConfig;
use qkube_common::PresetCatalog;
use tracing::debug;

use crate::{Error, Result};

const QKUBE_CONFIG_ENV: &str = "QKUBE_CONFIG";

/// Resolve the cloud config path using the priority chain
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(QKUBE_CONFIG_ENV) {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    CloudConfig::default_path()
        .ok_or_else(|| Error::command_failed("could not determine home directory"))
}

/// Load credentials from the resolved path
pub fn load_cloud_config(explicit: Option<&Path>) -> Result<CloudConfig> {
    let path = resolve_config_path(explicit)?;
    debug!(path = %path.display(), "Loading cloud config");
    Ok(CloudConfig::load(&path)?)
}

/// Zone from the flag, falling back to the config file
pub fn resolve_zone(flag: Option<&str>, config: &CloudConfig) -> Result<String> {
    flag.or(config.zone.as_deref())
        .map(str::trim)
        .filter(|zone| !zone.is_empty())
        .map(str::to_string)
        .ok_or_else(|| Error::validation("no zone given: pass --zone or set zone in the config file"))
}

/// Built-in catalog, or the one in `path`
pub fn load_presets(path: Option<&Path>) -> Result<PresetCatalog> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading presets");
            Ok(PresetCatalog::load(path)?)
        }
        None => Ok(PresetCatalog::builtin()),
    }
}
