//! Cloud collaborators for qkube
//!
//! The orchestrator only sees the three traits defined here:
//! - [`InstanceService`] creates, lists and terminates compute instances
//! - [`TagService`] finds, creates and attaches cluster tags
//! - [`KeyPairService`] finds and creates SSH key pairs
//!
//! [`qingcloud::QingCloudClient`] implements all three against the QingCloud
//! IaaS API.

pub mod config;
pub mod instance;
pub mod keypair;
pub mod qingcloud;
pub mod tag;

pub use config::CloudConfig;
pub use instance::{CreateInstancesOptions, Instance, InstanceService, Role};
pub use keypair::KeyPairService;
pub use qingcloud::QingCloudClient;
pub use tag::{Tag, TagService};

pub use qkube_common::{Error, Result};
