//! # Reconciler Configuration
//!
//! Poll interval, jitter, retry and key-strength settings for the reconciler.

use super::env_var_or_default;
use crate::constants::*;
use std::time::Duration;
use tracing::warn;

/// Reconciler configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Periodic re-arm interval (seconds)
    /// Every Certificate is reconciled at least this often so renewal-by-time is detected
    pub reconcile_interval_secs: u64,
    /// Upper bound of the random jitter subtracted from the re-arm interval (seconds)
    pub requeue_jitter_secs: u64,
    /// Attempts for re-fetch-and-retry writes that hit a conflict
    pub status_update_max_attempts: u32,
    /// Fibonacci backoff bounds for failed reconciliations (minutes)
    pub backoff_min_minutes: u64,
    pub backoff_max_minutes: u64,
    /// RSA modulus size for issued keys
    pub rsa_key_bits: u32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: DEFAULT_RECONCILE_INTERVAL_SECS,
            requeue_jitter_secs: DEFAULT_REQUEUE_JITTER_SECS,
            status_update_max_attempts: DEFAULT_STATUS_UPDATE_MAX_ATTEMPTS,
            backoff_min_minutes: DEFAULT_BACKOFF_MIN_MINUTES,
            backoff_max_minutes: DEFAULT_BACKOFF_MAX_MINUTES,
            rsa_key_bits: DEFAULT_RSA_KEY_BITS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let config = Self {
            reconcile_interval_secs: env_var_or_default(
                "RECONCILE_INTERVAL_SECS",
                DEFAULT_RECONCILE_INTERVAL_SECS,
            ),
            requeue_jitter_secs: env_var_or_default(
                "REQUEUE_JITTER_SECS",
                DEFAULT_REQUEUE_JITTER_SECS,
            ),
            status_update_max_attempts: env_var_or_default(
                "STATUS_UPDATE_MAX_ATTEMPTS",
                DEFAULT_STATUS_UPDATE_MAX_ATTEMPTS,
            ),
            backoff_min_minutes: env_var_or_default(
                "BACKOFF_MIN_MINUTES",
                DEFAULT_BACKOFF_MIN_MINUTES,
            ),
            backoff_max_minutes: env_var_or_default(
                "BACKOFF_MAX_MINUTES",
                DEFAULT_BACKOFF_MAX_MINUTES,
            ),
            rsa_key_bits: env_var_or_default("RSA_KEY_BITS", DEFAULT_RSA_KEY_BITS),
        };
        config.sanitized()
    }

    /// Clamp values that would break the timing or strength guarantees
    pub fn sanitized(mut self) -> Self {
        if self.reconcile_interval_secs == 0 {
            warn!(
                "RECONCILE_INTERVAL_SECS must be positive, using {}",
                DEFAULT_RECONCILE_INTERVAL_SECS
            );
            self.reconcile_interval_secs = DEFAULT_RECONCILE_INTERVAL_SECS;
        }
        if self.requeue_jitter_secs >= self.reconcile_interval_secs {
            warn!(
                jitter = self.requeue_jitter_secs,
                interval = self.reconcile_interval_secs,
                "Requeue jitter must be smaller than the reconcile interval, disabling jitter"
            );
            self.requeue_jitter_secs = 0;
        }
        self.status_update_max_attempts = self.status_update_max_attempts.max(1);
        if self.rsa_key_bits < MIN_RSA_KEY_BITS {
            warn!(
                "RSA_KEY_BITS={} is below the {}-bit minimum, using {}",
                self.rsa_key_bits, MIN_RSA_KEY_BITS, MIN_RSA_KEY_BITS
            );
            self.rsa_key_bits = MIN_RSA_KEY_BITS;
        }
        self
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn requeue_jitter(&self) -> Duration {
        Duration::from_secs(self.requeue_jitter_secs)
    }
}
