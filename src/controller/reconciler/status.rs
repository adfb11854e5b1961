//! # Status and Lifecycle Writes
//!
//! Re-fetch-and-retry writers for the status sub-resource and the lifecycle bookkeeping.
//! Each attempt reads the latest object, applies the change and writes it back carrying
//! the freshly read `resourceVersion`; a conflict triggers another attempt.

use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::crd::{Certificate, CertificateStatus, ConditionType, Lifecycle, RequestIntent};
use chrono::Utc;
use tracing::{debug, warn};

impl Reconciler {
    /// Apply `mutate` to the latest status and write it.
    ///
    /// Returns `Ok(None)` when the Certificate no longer exists.
    pub async fn update_status<F>(
        &self,
        namespace: &str,
        name: &str,
        mutate: F,
    ) -> Result<Option<Certificate>, ReconcilerError>
    where
        F: Fn(&mut CertificateStatus) + Send + Sync,
    {
        let attempts = self.config.status_update_max_attempts;
        for attempt in 1..=attempts {
            let Some(mut latest) = self.certificates.get_certificate(namespace, name).await? else {
                debug!(
                    "Certificate {}/{} was deleted during reconciliation, skipping status update",
                    namespace, name
                );
                return Ok(None);
            };

            let mut status = latest.status.take().unwrap_or_default();
            mutate(&mut status);
            latest.status = Some(status);

            match self.certificates.update_certificate_status(&latest).await {
                Ok(updated) => return Ok(Some(updated)),
                Err(e) if e.is_conflict() => {
                    debug!(attempt, attempts, "Status update conflicted, re-fetching");
                }
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }
        Err(ReconcilerError::StatusConflict(
            format!("{namespace}/{name}"),
            attempts,
        ))
    }

    /// Set a single condition; other True conditions flip to False
    pub async fn set_condition(
        &self,
        namespace: &str,
        name: &str,
        condition: ConditionType,
        reason: &str,
        message: &str,
    ) -> Result<Option<Certificate>, ReconcilerError> {
        self.update_status(namespace, name, |status| {
            status.set_condition(condition, reason, message, Utc::now());
        })
        .await
    }

    /// Record a failed reconciliation as the `Failed` condition (best effort)
    pub async fn record_failure(&self, namespace: &str, name: &str, error: &ReconcilerError) {
        let message = error.to_string();
        if let Err(e) = self
            .set_condition(namespace, name, ConditionType::Failed, error.reason(), &message)
            .await
        {
            warn!(
                resource.name = name,
                resource.namespace = namespace,
                error = %e,
                "Failed to record Failed condition"
            );
        }
    }

    /// Persist the lifecycle left behind by a reconciliation.
    ///
    /// The write is skipped when the stored object moved on since `generation` was read,
    /// either through a spec edit or a lifecycle stamped by an admission stage. The
    /// pending request then stays in place for the next reconciliation.
    pub async fn persist_lifecycle(
        &self,
        namespace: &str,
        name: &str,
        generation: Option<i64>,
        observed: &Lifecycle,
        intent: RequestIntent,
        obsolete_secret: Option<String>,
    ) -> Result<(), ReconcilerError> {
        if observed.intent == intent && observed.obsolete_secret == obsolete_secret {
            return Ok(());
        }

        let attempts = self.config.status_update_max_attempts;
        for attempt in 1..=attempts {
            let Some(mut latest) = self.certificates.get_certificate(namespace, name).await? else {
                return Ok(());
            };
            if latest.metadata.generation != generation {
                debug!(
                    observed = ?generation,
                    stored = ?latest.metadata.generation,
                    "Spec changed during reconciliation, leaving lifecycle for the next pass"
                );
                return Ok(());
            }
            let mut lifecycle = Lifecycle::from_meta(&latest.metadata)?;
            if lifecycle.intent != observed.intent
                || lifecycle.obsolete_secret != observed.obsolete_secret
            {
                debug!(
                    observed = %observed.intent,
                    stored = %lifecycle.intent,
                    "Lifecycle changed during reconciliation, leaving it for the next pass"
                );
                return Ok(());
            }

            lifecycle.intent = intent;
            lifecycle.obsolete_secret.clone_from(&obsolete_secret);
            lifecycle.write_to(&mut latest.metadata);

            match self.certificates.update_certificate(&latest).await {
                Ok(_) => {
                    debug!(intent = %intent, "Persisted lifecycle");
                    return Ok(());
                }
                Err(e) if e.is_conflict() => {
                    debug!(attempt, attempts, "Lifecycle update conflicted, re-fetching");
                }
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        Err(ReconcilerError::StatusConflict(
            format!("{namespace}/{name}"),
            attempts,
        ))
    }
}
