//! Certificate Controller Library
//!
//! Core functionality for the self-signed certificate controller: the `Certificate`
//! CRD, the admission stages, the certificate factory and the reconciler state machine.
//! Unit tests live next to the code; store-backed flows are tested under `tests/`.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;
pub mod webhook;

// Re-export CRD types for convenience
pub use crd::*;
