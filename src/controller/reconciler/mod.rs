//! # Reconciler
//!
//! Drives each Certificate toward a live TLS secret that matches its spec and is renewed
//! before it expires.
//!
//! ## Sub-modules
//!
//! - `types` - Reconciler context, backoff state and errors
//! - `state` - Pure transition function from observation to plan
//! - `reconcile` - Plan execution against the stores
//! - `status` - Re-fetch-and-retry status and lifecycle writes

mod reconcile;
mod state;
mod status;
mod types;

pub use reconcile::{periodic_requeue, reconcile, tls_secret};
pub use state::{plan, renewal_due, Observation, Operation, Plan};
pub use types::{BackoffState, Reconciler, ReconcilerError};
