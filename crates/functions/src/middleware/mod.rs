//! HTTP middleware for the hook server.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layer (capture errors)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. Hook signature (hook routes only)

pub mod hook_signature;
pub mod request_id;

pub use hook_signature::{HookSigner, SignatureError, SignedTarget, verify_hook_signature};
pub use request_id::request_id_middleware;
