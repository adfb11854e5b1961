//! Admission review handlers for Certificates
//!
//! The mutating handler runs the defaulting stage and rename stamping and answers with a
//! JSON patch. The validating handler runs the admission validator.

use std::sync::Arc;

use axum::{extract::State, Json};
use kube::core::{
    admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
    DynamicObject,
};
use tracing::{debug, error, info, warn};

use super::WebhookState;
use crate::crd::Certificate;
use crate::observability::metrics::increment_admission_requests;

/// Handle mutating admission review for Certificates
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            increment_admission_requests("mutate", "invalid");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let (response, verdict) = mutate(&state, &req).await;
    increment_admission_requests("mutate", verdict);
    Json(response.into_review())
}

/// Handle validating admission review for Certificates
pub async fn validate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            increment_admission_requests("validate", "invalid");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let (response, verdict) = validate(&state, &req).await;
    increment_admission_requests("validate", verdict);
    Json(response.into_review())
}

pub(crate) async fn mutate(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> (AdmissionResponse, &'static str) {
    if !matches!(request.operation, Operation::Create | Operation::Update) {
        return (AdmissionResponse::from(request), "allowed");
    }
    let incoming = match request.object.as_ref().map(|obj| parse(obj, request)) {
        Some(Ok(certificate)) => certificate,
        Some(Err(message)) => return (AdmissionResponse::from(request).deny(message), "denied"),
        None => {
            debug!(uid = %request.uid, "No object in request, allowing unchanged");
            return (AdmissionResponse::from(request), "allowed");
        }
    };
    let prior = match request.old_object.as_ref().map(|obj| parse(obj, request)).transpose() {
        Ok(prior) => prior,
        Err(message) => return (AdmissionResponse::from(request).deny(message), "denied"),
    };

    let mut mutated = match state.defaulter.apply_defaults(&incoming, prior.as_ref()) {
        Ok(mutated) => mutated,
        Err(e) => {
            info!(uid = %request.uid, name = %request.name, error = %e, "Rejected during defaulting");
            return (AdmissionResponse::from(request).deny(e.to_string()), "denied");
        }
    };
    if let Some(prior) = &prior {
        if let Err(e) = state.validator.stamp_rename(&mut mutated, prior).await {
            info!(uid = %request.uid, name = %request.name, error = %e, "Rejected secretRef rename");
            return (AdmissionResponse::from(request).deny(e.to_string()), "denied");
        }
    }

    let patch = match (serde_json::to_value(&incoming), serde_json::to_value(&mutated)) {
        (Ok(before), Ok(after)) => json_patch::diff(&before, &after),
        (Err(e), _) | (_, Err(e)) => {
            error!(uid = %request.uid, error = %e, "Failed to serialize certificate");
            return (
                AdmissionResponse::from(request).deny(format!("serialization error: {e}")),
                "denied",
            );
        }
    };
    if patch.0.is_empty() {
        return (AdmissionResponse::from(request), "allowed");
    }

    debug!(uid = %request.uid, name = %request.name, patch_ops = patch.0.len(), "Applying defaults patch");
    match AdmissionResponse::from(request).with_patch(patch) {
        Ok(response) => (response, "patched"),
        Err(e) => {
            error!(uid = %request.uid, error = %e, "Failed to serialize patch");
            (
                AdmissionResponse::from(request).deny(format!("patch serialization error: {e}")),
                "denied",
            )
        }
    }
}

pub(crate) async fn validate(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> (AdmissionResponse, &'static str) {
    let parse_opt = |obj: Option<&DynamicObject>| obj.map(|obj| parse(obj, request)).transpose();
    let (candidate, prior) = match (
        parse_opt(request.object.as_ref()),
        parse_opt(request.old_object.as_ref()),
    ) {
        (Ok(candidate), Ok(prior)) => (candidate, prior),
        (Err(message), _) | (_, Err(message)) => {
            return (AdmissionResponse::from(request).deny(message), "denied")
        }
    };

    let outcome = match (&request.operation, candidate, prior) {
        (Operation::Create, Some(candidate), _) => state.validator.validate_create(&candidate).await,
        (Operation::Update, Some(candidate), Some(prior)) => {
            state.validator.validate_update(&candidate, &prior).await
        }
        (Operation::Delete, _, Some(prior)) => state.validator.validate_delete(&prior).await,
        _ => Ok(Vec::new()),
    };

    match outcome {
        Ok(warnings) => {
            let mut response = AdmissionResponse::from(request);
            if !warnings.is_empty() {
                warn!(uid = %request.uid, name = %request.name, ?warnings, "Admitted with warnings");
                response.warnings = Some(warnings);
            }
            (response, "allowed")
        }
        Err(e) => {
            info!(uid = %request.uid, name = %request.name, error = %e, "Rejected certificate");
            (AdmissionResponse::from(request).deny(e.to_string()), "denied")
        }
    }
}

/// Decode the typed Certificate, taking the namespace from the request when the object omits it
fn parse(
    obj: &DynamicObject,
    request: &AdmissionRequest<DynamicObject>,
) -> Result<Certificate, String> {
    let mut certificate: Certificate = serde_json::to_value(obj)
        .and_then(serde_json::from_value)
        .map_err(|e| format!("invalid certificate object: {e}"))?;
    if certificate.metadata.namespace.is_none() {
        certificate.metadata.namespace = request.namespace.clone();
    }
    Ok(certificate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::store::MockSecretStore;
    use crate::crd::{REQUEST_INTENT_ANNOTATION, VALIDITY_ANNOTATION};
    use crate::webhook::{AdmissionValidator, DefaultingStage};
    use k8s_openapi::api::core::v1::Secret;
    use serde_json::{json, Value};

    fn state(existing: &'static [&'static str]) -> WebhookState {
        let mut secrets = MockSecretStore::new();
        secrets
            .expect_get_secret()
            .returning(move |_, name| Ok(existing.contains(&name).then(Secret::default)));
        WebhookState {
            defaulter: DefaultingStage::new(),
            validator: AdmissionValidator::new(Arc::new(secrets)),
        }
    }

    fn certificate_json(secret: &str, annotations: Value) -> Value {
        json!({
            "apiVersion": "certs.k8c.io/v1",
            "kind": "Certificate",
            "metadata": {"name": "web", "namespace": "default", "annotations": annotations},
            "spec": {
                "dnsName": "example.com",
                "validity": "30d",
                "secretRef": {"name": secret}
            }
        })
    }

    fn request(operation: &str, object: Value, old_object: Value) -> AdmissionRequest<DynamicObject> {
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
                "kind": {"group": "certs.k8c.io", "version": "v1", "kind": "Certificate"},
                "resource": {"group": "certs.k8c.io", "version": "v1", "resource": "certificates"},
                "name": "web",
                "namespace": "default",
                "operation": operation,
                "userInfo": {"username": "admin"},
                "object": object,
                "oldObject": old_object,
                "dryRun": false
            }
        }))
        .unwrap();
        review.try_into().unwrap()
    }

    fn patched(response: &AdmissionResponse, original: &Value) -> Value {
        let patch: json_patch::Patch =
            serde_json::from_slice(response.patch.as_ref().unwrap()).unwrap();
        let mut document = original.clone();
        json_patch::patch(&mut document, &patch).unwrap();
        document
    }

    #[tokio::test]
    async fn test_mutate_create_returns_defaults_patch() {
        let object = certificate_json("web-tls", json!({}));
        let req = request("CREATE", object.clone(), Value::Null);

        let (response, verdict) = mutate(&state(&[]), &req).await;
        assert_eq!(verdict, "patched");
        assert!(response.allowed);

        let document = patched(&response, &object);
        assert_eq!(document["spec"]["renewBefore"], "5m");
        assert_eq!(document["spec"]["subject"]["commonName"], "example.com");
        assert_eq!(document["metadata"]["annotations"][VALIDITY_ANNOTATION], "720h");
        assert_eq!(document["metadata"]["annotations"][REQUEST_INTENT_ANNOTATION], "Create");
    }

    #[tokio::test]
    async fn test_mutate_rejects_bad_validity() {
        let mut object = certificate_json("web-tls", json!({}));
        object["spec"]["validity"] = json!("90m");
        let req = request("CREATE", object, Value::Null);

        let (response, verdict) = mutate(&state(&[]), &req).await;
        assert_eq!(verdict, "denied");
        assert!(!response.allowed);
    }

    #[tokio::test]
    async fn test_validate_create_denies_existing_secret() {
        let object = certificate_json("web-tls", json!({VALIDITY_ANNOTATION: "720h"}));
        let req = request("CREATE", object, Value::Null);

        let (response, verdict) = validate(&state(&["web-tls"]), &req).await;
        assert_eq!(verdict, "denied");
        assert!(!response.allowed);
        assert!(response.result.message.contains("already exists"));
    }

    #[tokio::test]
    async fn test_validate_delete_is_allowed() {
        let old = certificate_json("web-tls", json!({VALIDITY_ANNOTATION: "720h"}));
        let req = request("DELETE", Value::Null, old);

        let (response, verdict) = validate(&state(&["web-tls"]), &req).await;
        assert_eq!(verdict, "allowed");
        assert!(response.allowed);
    }
}
