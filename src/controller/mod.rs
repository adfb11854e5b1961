//! # Controller
//!
//! Certificate issuance, storage access and the reconciliation state machine.
//!
//! ## Sub-modules
//!
//! - `duration` - Duration grammar for `validity` and `renewBefore`
//! - `factory` - Self-signed certificate generation
//! - `store` - Store traits over Certificates and Secrets, and their Kubernetes implementation
//! - `backoff` - Fibonacci backoff for failed reconciliations
//! - `reconciler` - Lifecycle state machine and its executor
//! - `server` - HTTP servers for metrics, health checks and admission webhooks

pub mod backoff;
pub mod duration;
pub mod factory;
pub mod reconciler;
pub mod server;
pub mod store;
