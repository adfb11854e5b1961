//! # Metrics Module
//!
//! Prometheus metrics for monitoring the controller, organized by responsibility.
//!
//! ## Sub-modules
//!
//! - `registry` - Metrics registry setup and registration
//! - `controller_metrics` - Reconciliation, issuance and requeue metrics
//! - `webhook_metrics` - Admission request metrics

pub mod controller_metrics;
pub mod registry;
pub mod webhook_metrics;

pub use controller_metrics::*;
pub use registry::*;
pub use webhook_metrics::*;
