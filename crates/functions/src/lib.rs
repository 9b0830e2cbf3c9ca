//! Zone Editor server-side hooks.
//!
//! Provisions a tenant for every new identity and removes a zone's
//! dependent documents after the zone is deleted. Exposed as a library so
//! the hook server, the CLI and the integration tests share one
//! implementation.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod state;
