//! # Admission Validator
//!
//! Structural checks on Certificates plus the checks that need the secret store:
//! a new Certificate may not adopt a secret that already exists, and a `secretRef`
//! rename schedules the previous secret for deletion.

use crate::constants::{DEFAULT_RENEW_BEFORE, MAX_NOT_AFTER_YEAR, MIN_RENEW_BEFORE_SECS};
use crate::controller::duration::parse_duration;
use crate::controller::factory::is_decimal;
use crate::controller::store::SecretStore;
use crate::crd::{Certificate, Lifecycle, RequestIntent};
use crate::webhook::error::AdmissionError;
use chrono::{Datelike, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub struct AdmissionValidator {
    secrets: Arc<dyn SecretStore>,
}

impl std::fmt::Debug for AdmissionValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionValidator").finish_non_exhaustive()
    }
}

impl AdmissionValidator {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self { secrets }
    }

    /// Validate a Certificate being created.
    ///
    /// Returns admission warnings on success.
    pub async fn validate_create(
        &self,
        candidate: &Certificate,
    ) -> Result<Vec<String>, AdmissionError> {
        let warnings = validate_structure(candidate)?;
        let namespace = namespace_of(candidate)?;
        let secret_name = candidate.spec.secret_name();

        if self.secrets.get_secret(namespace, secret_name).await?.is_some() {
            return Err(AdmissionError::conflict(format!(
                "secret reference already exists: {namespace}/{secret_name}"
            )));
        }
        Ok(warnings)
    }

    /// Validate an update of `prior` into `candidate`
    pub async fn validate_update(
        &self,
        candidate: &Certificate,
        prior: &Certificate,
    ) -> Result<Vec<String>, AdmissionError> {
        let warnings = validate_structure(candidate)?;
        if candidate.spec.secret_name() != prior.spec.secret_name() {
            debug!(
                from = prior.spec.secret_name(),
                to = candidate.spec.secret_name(),
                "Admitting secretRef rename"
            );
        }
        Ok(warnings)
    }

    /// Deletion is always admitted; the secret goes with its owner
    pub async fn validate_delete(&self, _prior: &Certificate) -> Result<Vec<String>, AdmissionError> {
        Ok(Vec::new())
    }

    /// Carry the pending cleanup marker forward and stamp a new one on a `secretRef` rename.
    ///
    /// The marker is only carried over writes that change the declared spec. A write that
    /// leaves the spec alone and drops the marker is the controller clearing it after cleanup.
    /// A rename while an earlier obsolete secret still awaits deletion is rejected, since
    /// only one obsolete secret is tracked at a time.
    pub async fn stamp_rename(
        &self,
        candidate: &mut Certificate,
        prior: &Certificate,
    ) -> Result<(), AdmissionError> {
        if candidate.spec == prior.spec {
            return Ok(());
        }
        let mut lifecycle = Lifecycle::from_meta(&candidate.metadata)
            .map_err(|e| AdmissionError::validation(e.to_string()))?;
        let pending = Lifecycle::from_meta(&prior.metadata)
            .ok()
            .and_then(|prior| prior.obsolete_secret);
        let before = lifecycle.clone();

        if lifecycle.obsolete_secret.is_none() {
            lifecycle.obsolete_secret = pending.clone();
        }

        let old_name = prior.spec.secret_name();
        let new_name = candidate.spec.secret_name();
        if old_name != new_name {
            let namespace = namespace_of(prior)?;
            if self.secrets.get_secret(namespace, old_name).await?.is_some() {
                if let Some(pending) = pending.as_deref().filter(|p| *p != new_name && *p != old_name) {
                    if self.secrets.get_secret(namespace, pending).await?.is_some() {
                        return Err(AdmissionError::conflict(format!(
                            "cleanup of obsolete secret {namespace}/{pending} is still pending"
                        )));
                    }
                }
                info!(
                    resource.namespace = namespace,
                    obsolete = old_name,
                    secret = new_name,
                    "Marking renamed secret for deletion"
                );
                lifecycle.obsolete_secret = Some(old_name.to_string());
                lifecycle.intent = RequestIntent::Update;
            }
        }

        if lifecycle != before {
            lifecycle.write_to(&mut candidate.metadata);
        }
        Ok(())
    }
}

/// Checks that need nothing but the object
pub fn validate_structure(candidate: &Certificate) -> Result<Vec<String>, AdmissionError> {
    let spec = &candidate.spec;
    let mut warnings = Vec::new();

    if spec.dns_name.trim().is_empty() {
        return Err(AdmissionError::validation("spec.dnsName must not be empty"));
    }
    if spec.secret_name().trim().is_empty() {
        return Err(AdmissionError::validation(
            "spec.secretRef.name must not be empty",
        ));
    }
    if let Some(subject) = &spec.subject {
        if !subject.serial_number.is_empty() && !is_decimal(&subject.serial_number) {
            return Err(AdmissionError::validation(format!(
                "invalid serial number {}: must be a base-10 integer",
                subject.serial_number
            )));
        }
    }

    let validity = Lifecycle::from_meta(&candidate.metadata)
        .and_then(|lifecycle| lifecycle.require_validity())
        .map_err(|e| AdmissionError::validation(e.to_string()))?;
    let not_after = validity
        .to_chrono()
        .ok()
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime));
    if not_after.map_or(true, |not_after| not_after.year() > MAX_NOT_AFTER_YEAR) {
        return Err(AdmissionError::validation(format!(
            "validity {} would end after the year {MAX_NOT_AFTER_YEAR}",
            spec.validity
        )));
    }

    let renew_before_value = spec
        .renew_before
        .as_deref()
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_RENEW_BEFORE);
    let renew_before = parse_duration(renew_before_value).map_err(|e| {
        AdmissionError::validation(format!(
            "invalid value {renew_before_value} for RenewBefore field err: {e}"
        ))
    })?;
    if chrono::Duration::from_std(renew_before).is_err() {
        return Err(AdmissionError::validation(format!(
            "renewBefore {renew_before_value} is too large"
        )));
    }
    if renew_before < Duration::from_secs(MIN_RENEW_BEFORE_SECS) {
        return Err(AdmissionError::validation(format!(
            "renewBefore {renew_before_value} is shorter than the minimum of 5m"
        )));
    }

    if renew_before >= validity.as_duration() {
        warnings.push(format!(
            "renewBefore {renew_before_value} is not shorter than validity {validity}; the certificate will be renewed on every reconcile"
        ));
    }
    Ok(warnings)
}

fn namespace_of(certificate: &Certificate) -> Result<&str, AdmissionError> {
    certificate
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| AdmissionError::validation("metadata.namespace must be set"))
}
