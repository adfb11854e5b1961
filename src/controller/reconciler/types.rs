//! # Reconciler Types
//!
//! Reconciler context, per-object backoff state and the reconciler error type.

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::controller::duration::DurationError;
use crate::controller::factory::{CertificateIssuer, GenerationError};
use crate::controller::store::{CertificateStore, SecretStore, StoreError};
use crate::crd::LifecycleError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("certificate has no {0}")]
    MissingMetadata(&'static str),
    #[error("invalid renewBefore: {0}")]
    InvalidRenewBefore(#[source] DurationError),
    #[error("invalid validity: {0}")]
    InvalidValidity(#[source] DurationError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to delete obsolete secret {name}: {source}")]
    Cleanup {
        name: String,
        #[source]
        source: StoreError,
    },
    #[error("status of {0} kept conflicting after {1} attempts")]
    StatusConflict(String, u32),
}

impl ReconcilerError {
    /// Whether the failure is recorded as a `Failed` condition.
    ///
    /// A cleanup failure leaves the new credential live, so the terminal condition stays.
    pub fn records_failure(&self) -> bool {
        !matches!(self, ReconcilerError::Cleanup { .. } | ReconcilerError::MissingMetadata(_))
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ReconcilerError::MissingMetadata(_) => "MissingMetadata",
            ReconcilerError::InvalidRenewBefore(_) | ReconcilerError::InvalidValidity(_) => {
                "InvalidSpec"
            }
            ReconcilerError::Lifecycle(_) => "InvalidLifecycle",
            ReconcilerError::Generation(_) => "GenerationFailed",
            ReconcilerError::Store(_) | ReconcilerError::StatusConflict(..) => "StoreError",
            ReconcilerError::Cleanup { .. } => "CleanupFailed",
        }
    }
}

/// Backoff state for a specific resource
/// Tracks error count and backoff calculator for progressive retries
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    pub fn new(min_minutes: u64, max_minutes: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_minutes, max_minutes),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }
}

/// Reconciler context shared by every reconciliation
///
/// Stores and the issuer are injected at construction so tests can swap them out.
pub struct Reconciler {
    pub certificates: Arc<dyn CertificateStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub issuer: Arc<dyn CertificateIssuer>,
    pub config: ControllerConfig,
    /// Backoff state per resource (namespace/name)
    pub backoff_states: Mutex<HashMap<String, BackoffState>>,
    /// Last seen declared-spec fingerprint per resource (namespace/name)
    pub spec_fingerprints: Mutex<HashMap<String, u64>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    pub fn new(
        certificates: Arc<dyn CertificateStore>,
        secrets: Arc<dyn SecretStore>,
        issuer: Arc<dyn CertificateIssuer>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            certificates,
            secrets,
            issuer,
            config,
            backoff_states: Mutex::new(HashMap::new()),
            spec_fingerprints: Mutex::new(HashMap::new()),
        }
    }

    pub fn new_backoff_state(&self) -> BackoffState {
        BackoffState::new(self.config.backoff_min_minutes, self.config.backoff_max_minutes)
    }

    /// Drop the error history of a resource
    pub fn clear_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(resource_key);
        }
    }

    /// Record the declared-spec fingerprint; returns true when it differs from the last one seen
    pub fn observe_spec(&self, resource_key: &str, fingerprint: u64) -> bool {
        match self.spec_fingerprints.lock() {
            Ok(mut fingerprints) => fingerprints
                .insert(resource_key.to_string(), fingerprint)
                .is_some_and(|previous| previous != fingerprint),
            Err(_) => false,
        }
    }
}
