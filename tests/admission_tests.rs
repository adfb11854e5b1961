//! Admission chain behavior: defaulting, validation and rename marking

mod common;

use certificate_controller::crd::{Lifecycle, RequestIntent, VALIDITY_ANNOTATION};
use certificate_controller::webhook::{AdmissionError, DefaultingStage};
use common::{new_certificate, AdmissionChain, InMemoryStore};

#[tokio::test]
async fn test_defaulting_twice_changes_nothing() {
    let store = InMemoryStore::new();
    let chain = AdmissionChain::new(&store);
    let created = chain.create(new_certificate("web", "web-tls")).await.unwrap();

    let resubmitted = chain.update(created.clone()).await.unwrap();
    assert_eq!(resubmitted.spec, created.spec);
    assert_eq!(resubmitted.metadata.annotations, created.metadata.annotations);
    assert_eq!(resubmitted.metadata.generation, created.metadata.generation);
}

#[test]
fn test_validity_is_fixed_in_hours() {
    let stage = DefaultingStage::new();
    for n in [1_u64, 7, 30, 365] {
        for (unit, hours) in [("h", n), ("d", n * 24), ("y", n * 365 * 24)] {
            let mut certificate = new_certificate("web", "web-tls");
            certificate.spec.validity = format!("{n}{unit}");
            let defaulted = stage.apply_defaults(&certificate, None).unwrap();
            let stored = &defaulted.metadata.annotations.as_ref().unwrap()[VALIDITY_ANNOTATION];
            assert_eq!(stored, &format!("{hours}h"), "validity {n}{unit}");
        }
    }

    for invalid in ["30m", "30s", "30w", "d30", "30"] {
        let mut certificate = new_certificate("web", "web-tls");
        certificate.spec.validity = invalid.to_string();
        assert!(
            stage.apply_defaults(&certificate, None).is_err(),
            "{invalid} should be rejected"
        );
    }
}

#[tokio::test]
async fn test_renew_before_floor_and_default() {
    let store = InMemoryStore::new();
    let chain = AdmissionChain::new(&store);

    let created = chain.create(new_certificate("web", "web-tls")).await.unwrap();
    assert_eq!(created.spec.renew_before.as_deref(), Some("5m"));

    let mut too_short = new_certificate("short", "short-tls");
    too_short.spec.renew_before = Some("299s".to_string());
    let result = chain.create(too_short).await;
    assert!(matches!(result, Err(AdmissionError::Validation(_))));
    assert!(store.certificate("short").is_none());

    let mut incoming = store.certificate("web").unwrap();
    incoming.spec.renew_before = Some("4m".to_string());
    assert!(matches!(
        chain.update(incoming).await,
        Err(AdmissionError::Validation(_))
    ));
    assert_eq!(
        store.certificate("web").unwrap().spec.renew_before.as_deref(),
        Some("5m")
    );
}

#[tokio::test]
async fn test_lifetime_must_end_within_x509_time() {
    let store = InMemoryStore::new();
    let chain = AdmissionChain::new(&store);

    for too_long in ["10000y", "1000000y"] {
        let mut certificate = new_certificate("forever", "forever-tls");
        certificate.spec.validity = too_long.to_string();
        let result = chain.create(certificate).await;
        assert!(
            matches!(result, Err(AdmissionError::Validation(_))),
            "{too_long} should be rejected"
        );
    }
    assert!(store.certificate("forever").is_none());

    let mut certificate = new_certificate("long", "long-tls");
    certificate.spec.validity = "100y".to_string();
    chain.create(certificate).await.unwrap();
}

#[tokio::test]
async fn test_create_collision_is_rejected_without_persisting() {
    let store = InMemoryStore::new();
    store.insert_secret("taken-tls", "someone else");

    let result = AdmissionChain::new(&store)
        .create(new_certificate("web", "taken-tls"))
        .await;

    assert!(matches!(result, Err(AdmissionError::Conflict(_))));
    assert!(store.certificate("web").is_none());
}

#[tokio::test]
async fn test_create_stamps_create_intent() {
    let store = InMemoryStore::new();
    let created = AdmissionChain::new(&store)
        .create(new_certificate("web", "web-tls"))
        .await
        .unwrap();
    let lifecycle = Lifecycle::from_meta(&created.metadata).unwrap();
    assert_eq!(lifecycle.intent, RequestIntent::Create);
    assert_eq!(lifecycle.validity.map(|v| v.hours()), Some(720));
    assert_eq!(lifecycle.obsolete_secret, None);
}

#[tokio::test]
async fn test_rename_marks_existing_secret_obsolete() {
    let store = InMemoryStore::new();
    let chain = AdmissionChain::new(&store);
    chain.create(new_certificate("web", "a-tls")).await.unwrap();
    store.insert_secret("a-tls", "issued");

    let mut incoming = store.certificate("web").unwrap();
    incoming.spec.secret_ref.name = "b-tls".to_string();
    let updated = chain.update(incoming).await.unwrap();

    let lifecycle = Lifecycle::from_meta(&updated.metadata).unwrap();
    assert_eq!(lifecycle.intent, RequestIntent::Update);
    assert_eq!(lifecycle.obsolete_secret.as_deref(), Some("a-tls"));
}

#[tokio::test]
async fn test_second_rename_waits_for_pending_cleanup() {
    let store = InMemoryStore::new();
    let chain = AdmissionChain::new(&store);
    chain.create(new_certificate("web", "a-tls")).await.unwrap();
    store.insert_secret("a-tls", "first");

    let mut incoming = store.certificate("web").unwrap();
    incoming.spec.secret_ref.name = "b-tls".to_string();
    chain.update(incoming).await.unwrap();
    store.insert_secret("b-tls", "second");

    let mut incoming = store.certificate("web").unwrap();
    incoming.spec.secret_ref.name = "c-tls".to_string();
    let result = chain.update(incoming).await;
    assert!(matches!(result, Err(AdmissionError::Conflict(_))));
    assert_eq!(
        store.certificate("web").unwrap().spec.secret_ref.name,
        "b-tls"
    );
}

#[tokio::test]
async fn test_dropped_marker_is_carried_forward() {
    let store = InMemoryStore::new();
    let chain = AdmissionChain::new(&store);
    chain.create(new_certificate("web", "a-tls")).await.unwrap();
    store.insert_secret("a-tls", "first");

    let mut incoming = store.certificate("web").unwrap();
    incoming.spec.secret_ref.name = "b-tls".to_string();
    chain.update(incoming).await.unwrap();

    // a client that round-trips the object without our annotations
    let mut incoming = store.certificate("web").unwrap();
    incoming.metadata.annotations = None;
    incoming.spec.email_addresses = vec!["ops@example.com".to_string()];
    let updated = chain.update(incoming).await.unwrap();

    let lifecycle = Lifecycle::from_meta(&updated.metadata).unwrap();
    assert_eq!(lifecycle.obsolete_secret.as_deref(), Some("a-tls"));
    assert!(lifecycle.validity.is_some());
}
