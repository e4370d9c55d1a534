//! SSH key pairs

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use qkube_common::Result;

/// Key pair operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KeyPairService: Send + Sync {
    /// ID of the key pair with this exact name, if any
    async fn find_key_pair_by_name(&self, name: &str) -> Result<Option<String>>;

    /// Register a public key under a name and return the key pair ID
    async fn create_key_pair(&self, name: &str, public_key: &str) -> Result<String>;
}
