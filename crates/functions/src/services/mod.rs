//! Hook business logic.
//!
//! # Services
//!
//! - `provisioning` - Create a tenant for each new identity
//! - `cascade` - Remove a deleted zone's dependent documents

pub mod cascade;
pub mod provisioning;

pub use cascade::{CascadeDeleter, CascadeError, CascadeReport, CollectionReport};
pub use provisioning::{ProvisionError, ProvisionedTenant, TenantProvisioner};
