//! # Observability
//!
//! Prometheus metrics for the controller and the admission webhooks.

pub mod metrics;
