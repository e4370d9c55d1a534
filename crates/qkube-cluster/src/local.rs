//! Local files: the operator's public key and the exported kubeconfig

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::debug;

use qkube_common::{Error, Result, LOCAL_KUBECONFIG_FILE};

/// `~/.ssh/id_rsa.pub`
pub fn default_public_key_path() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".ssh").join("id_rsa.pub"))
        .ok_or_else(|| Error::config("could not determine home directory"))
}

/// Read an OpenSSH public key, trimmed
pub async fn read_public_key(path: &Path) -> Result<String> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| Error::io(path.display().to_string(), e))?;
    let key = content.trim();
    if key.is_empty() {
        return Err(Error::config(format!(
            "public key file {} is empty",
            path.display()
        )));
    }
    Ok(key.to_string())
}

/// Write `content` to `<dir>/kubeconfig`, readable by the owner only
///
/// Creates `dir` if needed and replaces an existing file.
pub async fn write_kubeconfig(dir: &Path, content: &[u8]) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| Error::io(dir.display().to_string(), e))?;

    let path = dir.join(LOCAL_KUBECONFIG_FILE);
    let io_err = |e| Error::io(path.display().to_string(), e);

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&path).await.map_err(io_err)?;
    file.write_all(content).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;

    // mode() only applies on creation
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .await
            .map_err(io_err)?;
    }

    debug!(path = %path.display(), bytes = content.len(), "Wrote kubeconfig");
    Ok(path)
}
