//! Resource tags

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use qkube_common::Result;

/// A tag that groups a cluster's resources
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Cloud tag ID
    pub id: String,
    /// Tag name
    pub name: String,
}

/// Tag operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TagService: Send + Sync {
    /// Find a tag whose name matches exactly
    async fn find_tag_by_name(&self, name: &str) -> Result<Option<Tag>>;

    /// Create a tag and return its ID
    async fn create_tag(&self, name: &str) -> Result<String>;

    /// Attach a tag to instances
    async fn attach_instances(&self, tag_id: &str, instance_ids: &[String]) -> Result<()>;
}
