//! # Reconcile
//!
//! Executes the plan produced by the state machine: issues, rotates or renews the TLS
//! secret, deletes obsolete secrets and records conditions and lifecycle.
//!
//! The Certificate and its Secret are written in separate calls. Every step is safe to
//! re-drive from whatever state the previous attempt left behind.

use crate::constants::{DEFAULT_RENEW_BEFORE, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY, TLS_SECRET_TYPE};
use crate::controller::duration::{parse_duration, parse_validity, DurationError, ValidityPeriod};
use crate::controller::factory::{GenerationError, IssuedCertificate};
use crate::controller::reconciler::state::{plan, Observation, Operation};
use crate::controller::reconciler::types::{Reconciler, ReconcilerError};
use crate::controller::store::StoreError;
use crate::crd::{
    spec_fingerprint, Certificate, CertificateSpec, CertificateStatus, ConditionType, Lifecycle,
    RequestIntent,
};
use crate::observability;
use chrono::Utc;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::ByteString;
use kube::core::ObjectMeta;
use kube::Resource;
use kube_runtime::controller::Action;
use rand::Rng;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

/// Reconcile a single Certificate
///
/// Always re-arms a periodic trigger so renewal-by-time is evaluated without any change event.
pub async fn reconcile(
    certificate: Arc<Certificate>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = certificate
        .metadata
        .name
        .clone()
        .ok_or(ReconcilerError::MissingMetadata("name"))?;
    let namespace = certificate
        .metadata
        .namespace
        .clone()
        .ok_or(ReconcilerError::MissingMetadata("namespace"))?;

    let span = info_span!(
        "controller.reconcile",
        resource.name = %name,
        resource.namespace = %namespace,
        resource.kind = "Certificate"
    );

    async move {
        let start = Instant::now();
        observability::metrics::increment_reconciliations();

        if certificate.metadata.deletion_timestamp.is_some() {
            debug!("Certificate is being deleted, its secret is garbage collected");
            return Ok(Action::await_change());
        }

        let resource_key = format!("{namespace}/{name}");
        if ctx.observe_spec(&resource_key, spec_fingerprint(&certificate.spec)) {
            info!("Declared spec changed, resetting error backoff");
            ctx.clear_backoff(&resource_key);
        }

        let result = execute(&certificate, &ctx, &namespace, &name).await;
        observability::metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                ctx.clear_backoff(&resource_key);
                let requeue = periodic_requeue(&ctx);
                debug!(requeue_secs = requeue.as_secs(), "Reconciliation complete");
                observability::metrics::increment_requeues_total("periodic");
                Ok(Action::requeue(requeue))
            }
            Err(e) => {
                if e.records_failure() {
                    ctx.record_failure(&namespace, &name, &e).await;
                }
                Err(e)
            }
        }
    }
    .instrument(span)
    .await
}

/// Re-arm interval: the configured poll minus a random jitter, so the poll stays an upper bound
pub fn periodic_requeue(ctx: &Reconciler) -> Duration {
    let interval = ctx.config.reconcile_interval();
    let jitter_ms = u64::try_from(ctx.config.requeue_jitter().as_millis()).unwrap_or(0);
    if jitter_ms == 0 {
        return interval;
    }
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
    interval.saturating_sub(jitter)
}

async fn execute(
    certificate: &Certificate,
    ctx: &Reconciler,
    namespace: &str,
    name: &str,
) -> Result<(), ReconcilerError> {
    let lifecycle = Lifecycle::from_meta(&certificate.metadata)?;
    let secret_name = certificate.spec.secret_name();
    let existing_secret = ctx.secrets.get_secret(namespace, secret_name).await?;
    let renew_before = renew_before(&certificate.spec)?;
    let expiry = certificate
        .status
        .as_ref()
        .and_then(CertificateStatus::expiry);

    let plan = plan(&Observation {
        intent: lifecycle.intent,
        obsolete_secret: lifecycle.obsolete_secret.as_deref(),
        secret_name,
        secret_present: existing_secret.is_some(),
        expiry,
        renew_before,
        now: Utc::now(),
    });
    debug!(intent = %lifecycle.intent, operations = ?plan.operations, "Planned reconciliation");

    let mut next_intent = RequestIntent::None;
    let mut next_obsolete = None;
    let mut cleanup_failure = None;

    for operation in &plan.operations {
        match operation {
            Operation::Issue | Operation::Rotate | Operation::Renew { .. } => {
                let provisioned = provision(
                    ctx,
                    certificate,
                    namespace,
                    name,
                    &lifecycle,
                    operation,
                    plan.reason,
                    existing_secret.clone(),
                )
                .await?;
                if !provisioned {
                    return Ok(());
                }
            }
            Operation::DeleteObsolete(obsolete) => {
                match ctx.secrets.delete_secret(namespace, obsolete).await {
                    Ok(()) => {
                        info!(secret = %obsolete, "Deleted obsolete secret");
                        observability::metrics::increment_obsolete_secrets_deleted();
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(secret = %obsolete, "Obsolete secret already gone");
                    }
                    Err(e) => {
                        warn!(
                            secret = %obsolete,
                            error = %e,
                            "Failed to delete obsolete secret, scheduling cleanup"
                        );
                        next_intent = RequestIntent::Cleanup;
                        next_obsolete = Some(obsolete.clone());
                        cleanup_failure = Some(ReconcilerError::Cleanup {
                            name: obsolete.clone(),
                            source: e,
                        });
                    }
                }
            }
        }
    }

    ctx.persist_lifecycle(
        namespace,
        name,
        certificate.metadata.generation,
        &lifecycle,
        next_intent,
        next_obsolete,
    )
    .await?;

    match cleanup_failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Issue, rotate or renew the credential and record the matching conditions.
///
/// Returns `false` when the Certificate disappeared mid-way.
#[allow(
    clippy::too_many_arguments,
    reason = "Operation context is passed explicitly rather than bundled"
)]
async fn provision(
    ctx: &Reconciler,
    certificate: &Certificate,
    namespace: &str,
    name: &str,
    lifecycle: &Lifecycle,
    operation: &Operation,
    reason: &'static str,
    existing_secret: Option<Secret>,
) -> Result<bool, ReconcilerError> {
    let secret_name = certificate.spec.secret_name();
    let renewing = matches!(operation, Operation::Renew { .. });
    let expired = matches!(operation, Operation::Renew { expired: true });

    let started = ctx
        .update_status(namespace, name, |status| {
            let now = Utc::now();
            if expired {
                status.set_condition(
                    ConditionType::Expired,
                    reason,
                    format!("Certificate in secret {secret_name} has expired"),
                    now,
                );
            }
            if renewing {
                status.set_condition(
                    ConditionType::Renewing,
                    reason,
                    format!("Renewing certificate in secret {secret_name}"),
                    now,
                );
            } else {
                status.set_condition(
                    ConditionType::Pending,
                    reason,
                    format!("Issuing certificate into secret {secret_name}"),
                    now,
                );
            }
        })
        .await?;
    if started.is_none() {
        return Ok(false);
    }

    let validity = lifetime(certificate, lifecycle)?;
    let issued = generate(ctx, &certificate.spec, validity).await?;
    write_secret(ctx, certificate, namespace, existing_secret, &issued).await?;

    let expiry_date = issued.not_after.to_rfc3339();
    let issued_at = issued.not_before;
    // the generation the credential was issued from, not whatever is stored by now
    let issued_generation = certificate.metadata.generation;
    let finished = ctx
        .update_status(namespace, name, |status| {
            status.expiry_date = Some(expiry_date.clone());
            status.secret_ref = Some(secret_name.to_string());
            status.observed_generation = issued_generation;
            if renewing {
                status.renewed_at = Some(issued_at.to_rfc3339());
                status.set_condition(
                    ConditionType::Renewed,
                    reason,
                    format!("Certificate renewed, valid until {expiry_date}"),
                    Utc::now(),
                );
            } else {
                status.set_condition(
                    ConditionType::Issued,
                    reason,
                    format!("Certificate issued into secret {secret_name}, valid until {expiry_date}"),
                    Utc::now(),
                );
            }
        })
        .await?;

    if renewing {
        info!(secret = %secret_name, expiry = %expiry_date, "Renewed certificate");
        observability::metrics::increment_certificates_renewed();
    } else {
        info!(secret = %secret_name, expiry = %expiry_date, reason, "Issued certificate");
        observability::metrics::increment_certificates_issued();
    }
    Ok(finished.is_some())
}

/// Lifetime fixed at admission; derived from the spec only when the stored value is missing
fn lifetime(certificate: &Certificate, lifecycle: &Lifecycle) -> Result<ValidityPeriod, ReconcilerError> {
    lifecycle.require_validity().or_else(|e| {
        warn!(error = %e, validity = %certificate.spec.validity, "Deriving lifetime from spec");
        parse_validity(&certificate.spec.validity).map_err(ReconcilerError::InvalidValidity)
    })
}

fn renew_before(spec: &CertificateSpec) -> Result<chrono::Duration, ReconcilerError> {
    let value = spec
        .renew_before
        .as_deref()
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_RENEW_BEFORE);
    let duration = parse_duration(value).map_err(ReconcilerError::InvalidRenewBefore)?;
    chrono::Duration::from_std(duration)
        .map_err(|_| ReconcilerError::InvalidRenewBefore(DurationError::Overflow(value.to_string())))
}

/// Key generation is CPU-bound; keep it off the async workers
async fn generate(
    ctx: &Reconciler,
    spec: &CertificateSpec,
    validity: ValidityPeriod,
) -> Result<IssuedCertificate, ReconcilerError> {
    let issuer = Arc::clone(&ctx.issuer);
    let spec = spec.clone();
    let issued = tokio::task::spawn_blocking(move || issuer.issue(&spec, validity, Utc::now()))
        .await
        .map_err(|e| GenerationError::Interrupted(e.to_string()))??;
    Ok(issued)
}

async fn write_secret(
    ctx: &Reconciler,
    certificate: &Certificate,
    namespace: &str,
    existing: Option<Secret>,
    issued: &IssuedCertificate,
) -> Result<(), ReconcilerError> {
    let secret_name = certificate.spec.secret_name();
    let owner = certificate.controller_owner_ref(&());
    if owner.is_none() {
        warn!(secret = %secret_name, "Certificate has no uid, secret will not be garbage collected");
    }

    if let Some(current) = existing {
        match ctx
            .secrets
            .update_secret(&overwrite_secret(current, owner.clone(), issued))
            .await
        {
            Ok(_) => return Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(secret = %secret_name, "Secret vanished before overwrite, creating it");
            }
            Err(e) => return Err(e.into()),
        }
    }

    let secret = tls_secret(namespace, secret_name, owner.clone(), issued);
    match ctx.secrets.create_secret(&secret).await {
        Ok(_) => Ok(()),
        Err(StoreError::AlreadyExists(_)) => {
            // Lost a create race: converge by overwriting what is there now
            info!(secret = %secret_name, "Secret already exists, overwriting");
            let current = ctx
                .secrets
                .get_secret(namespace, secret_name)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("Secret {namespace}/{secret_name}")))?;
            ctx.secrets
                .update_secret(&overwrite_secret(current, owner, issued))
                .await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn tls_data(issued: &IssuedCertificate) -> BTreeMap<String, ByteString> {
    BTreeMap::from([
        (
            TLS_CERT_KEY.to_string(),
            ByteString(issued.certificate_pem.clone()),
        ),
        (
            TLS_PRIVATE_KEY_KEY.to_string(),
            ByteString(issued.private_key_pem.clone()),
        ),
    ])
}

/// New TLS secret owned by its Certificate
pub fn tls_secret(
    namespace: &str,
    name: &str,
    owner: Option<OwnerReference>,
    issued: &IssuedCertificate,
) -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        type_: Some(TLS_SECRET_TYPE.to_string()),
        data: Some(tls_data(issued)),
        ..Default::default()
    }
}

/// Replace key material in place; the secret type is immutable and left as is
fn overwrite_secret(
    mut secret: Secret,
    owner: Option<OwnerReference>,
    issued: &IssuedCertificate,
) -> Secret {
    secret.data = Some(tls_data(issued));
    secret.string_data = None;
    if let Some(owner) = owner {
        let references = secret.metadata.owner_references.get_or_insert_with(Vec::new);
        let has_controller = references.iter().any(|r| r.controller == Some(true));
        if !has_controller && !references.iter().any(|r| r.uid == owner.uid) {
            references.push(owner);
        }
    }
    secret
}
