//! Core types for Zone Editor.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod claims;
pub mod id;
pub mod identity;
pub mod path;
pub mod status;
pub mod tenant;

pub use claims::{Claims, ClaimsPatch};
pub use id::*;
pub use identity::{Identity, IdentityError};
pub use path::{CollectionPath, DocumentPath, PathError, validate_segment};
pub use status::*;
pub use tenant::{NewTenant, Tenant};
