//! # Defaulting Stage
//!
//! Runs on every create and update admission of a Certificate, before persistence.
//! Fills in the subject and `renewBefore`, fixes the absolute lifetime and stamps the
//! request intent for the reconciler.

use crate::constants::{DEFAULT_RENEW_BEFORE, FALLBACK_SERIAL_NUMBER};
use crate::controller::duration::{parse_validity, ValidityPeriod};
use crate::controller::factory::random_serial_number;
use crate::crd::{Certificate, Lifecycle, RequestIntent, X509Subject};
use crate::webhook::error::AdmissionError;
use openssl::error::ErrorStack;
use tracing::{debug, warn};

type SerialSource = fn() -> Result<String, ErrorStack>;

#[derive(Debug, Clone)]
pub struct DefaultingStage {
    serial_source: SerialSource,
}

impl Default for DefaultingStage {
    fn default() -> Self {
        Self {
            serial_source: random_serial_number,
        }
    }
}

impl DefaultingStage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different serial number source (the random source may fail)
    pub fn with_serial_source(serial_source: SerialSource) -> Self {
        Self { serial_source }
    }

    /// Apply defaults to `incoming`.
    ///
    /// `existing` is the persisted object on update. When the declared spec is unchanged
    /// the object is returned as is, apart from restoring a missing stored lifetime.
    pub fn apply_defaults(
        &self,
        incoming: &Certificate,
        existing: Option<&Certificate>,
    ) -> Result<Certificate, AdmissionError> {
        let mut mutated = incoming.clone();
        let mut lifecycle = Lifecycle::from_meta(&incoming.metadata)
            .map_err(|e| AdmissionError::validation(e.to_string()))?;

        if existing.is_some_and(|old| old.spec == incoming.spec) {
            if lifecycle.validity.is_none() {
                debug!("Spec unchanged, restoring stored validity");
                lifecycle.validity = Some(validity_of(incoming)?);
                lifecycle.write_to(&mut mutated.metadata);
            }
            return Ok(mutated);
        }

        if mutated.spec.subject.is_none() {
            let serial_number = (self.serial_source)().map_or_else(
                |e| {
                    warn!(error = %e, "Random serial number unavailable, using fallback");
                    FALLBACK_SERIAL_NUMBER.to_string()
                },
                |serial| serial,
            );
            mutated.spec.subject = Some(X509Subject {
                common_name: mutated.spec.dns_name.clone(),
                serial_number,
                ..Default::default()
            });
        }

        if mutated
            .spec
            .renew_before
            .as_deref()
            .map_or(true, str::is_empty)
        {
            mutated.spec.renew_before = Some(DEFAULT_RENEW_BEFORE.to_string());
        }

        lifecycle.validity = Some(validity_of(incoming)?);

        let never_reconciled = existing
            .and_then(|old| old.status.as_ref())
            .and_then(|status| status.observed_generation)
            .unwrap_or(0)
            == 0;
        lifecycle.intent = if never_reconciled {
            RequestIntent::Create
        } else {
            RequestIntent::Update
        };
        lifecycle.write_to(&mut mutated.metadata);

        debug!(
            intent = %lifecycle.intent,
            validity = ?lifecycle.validity.map(|v| v.to_string()),
            "Applied defaults"
        );
        Ok(mutated)
    }
}

fn validity_of(certificate: &Certificate) -> Result<ValidityPeriod, AdmissionError> {
    parse_validity(&certificate.spec.validity).map_err(|e| AdmissionError::validation(e.to_string()))
}
