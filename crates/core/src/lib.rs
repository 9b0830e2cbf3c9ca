//! Zone Editor Core - Shared types library.
//!
//! This crate provides common types used across all Zone Editor components:
//! - `functions` - Server-side hooks (tenant provisioning, cascade deletes)
//! - `client` - Client-resident session and token lifecycle
//! - `cli` - Command-line tools for migrations and maintenance
//!
//! # Architecture
//!
//! The core crate contains only types and constants - no I/O, no database
//! access, no HTTP clients. This keeps it lightweight and allows it to be used
//! anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, identities, claims, tenants and document paths
//! - [`limits`] - Fixed batch sizes and token timing constants

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod limits;
pub mod types;

pub use types::*;
