//! Shared fixtures for store-backed tests
//!
//! `InMemoryStore` behaves like the API server for the calls the controller makes:
//! optimistic concurrency on `resourceVersion`, generation bumps on spec changes,
//! uid assignment, `AlreadyExists` on duplicate creates. Failures can be injected.
//!
//! `AdmittedCertificates` routes the controller's own Certificate writes through the
//! admission chain, as the API server does with its webhooks installed.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use certificate_controller::config::ControllerConfig;
use certificate_controller::controller::duration::ValidityPeriod;
use certificate_controller::controller::factory::{
    CertificateIssuer, GenerationError, IssuedCertificate, SelfSignedIssuer,
};
use certificate_controller::controller::reconciler::Reconciler;
use certificate_controller::controller::store::{CertificateStore, SecretStore, StoreError};
use certificate_controller::crd::{Certificate, CertificateSpec, SecretRef};
use certificate_controller::webhook::{AdmissionError, AdmissionValidator, DefaultingStage};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const NAMESPACE: &str = "default";

type Key = (String, String);

type CertificateEdit = Box<dyn FnOnce(&Certificate) -> Certificate + Send>;

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

#[derive(Default)]
struct State {
    certificates: BTreeMap<Key, Certificate>,
    secrets: BTreeMap<Key, Secret>,
    next_version: u64,
    failing_deletes: BTreeSet<String>,
    status_conflicts: u32,
    create_race: Option<Secret>,
    concurrent_edit: Option<(String, CertificateEdit)>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    /// Land a queued concurrent edit the way an admitted user update would
    fn land_concurrent_edit(&mut self) {
        let Some((name, edit)) = self.concurrent_edit.take() else {
            return;
        };
        let object_key = key(NAMESPACE, &name);
        let stored = self.certificates.get(&object_key).cloned().unwrap();
        let mut edited = edit(&stored);
        edited.status = stored.status.clone();
        edited.metadata.uid = stored.metadata.uid.clone();
        edited.metadata.generation = if edited.spec == stored.spec {
            stored.metadata.generation
        } else {
            stored.metadata.generation.map(|g| g + 1)
        };
        edited.metadata.resource_version = Some(self.bump());
        self.certificates.insert(object_key, edited);
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Persist a new Certificate the way the API server does on create
    pub fn insert_certificate(&self, mut certificate: Certificate) -> Certificate {
        let mut state = self.state.lock().unwrap();
        let namespace = certificate.metadata.namespace.clone().unwrap();
        let name = certificate.metadata.name.clone().unwrap();
        certificate.metadata.uid = Some(format!("uid-{name}"));
        certificate.metadata.generation = Some(1);
        certificate.metadata.resource_version = Some(state.bump());
        certificate.status = None;
        state
            .certificates
            .insert(key(&namespace, &name), certificate.clone());
        certificate
    }

    pub fn certificate(&self, name: &str) -> Option<Certificate> {
        let state = self.state.lock().unwrap();
        state.certificates.get(&key(NAMESPACE, name)).cloned()
    }

    pub fn secret(&self, name: &str) -> Option<Secret> {
        let state = self.state.lock().unwrap();
        state.secrets.get(&key(NAMESPACE, name)).cloned()
    }

    pub fn insert_secret(&self, name: &str, data: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        state
            .secrets
            .insert(key(NAMESPACE, name), plain_secret(name, data, version));
    }

    /// Edit the stored status directly, e.g. to move the expiry
    pub fn edit_status(&self, name: &str, edit: impl FnOnce(&mut Certificate)) {
        let mut state = self.state.lock().unwrap();
        let version = state.bump();
        let certificate = state.certificates.get_mut(&key(NAMESPACE, name)).unwrap();
        edit(certificate);
        certificate.metadata.resource_version = Some(version);
    }

    pub fn fail_deletes_of(&self, name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_deletes
            .insert(name.to_string());
    }

    pub fn allow_deletes(&self) {
        self.state.lock().unwrap().failing_deletes.clear();
    }

    /// Make the next `count` status writes fail with a conflict
    pub fn conflict_next_status_writes(&self, count: u32) {
        self.state.lock().unwrap().status_conflicts = count;
    }

    /// Another writer creates `name` right before the next secret create lands
    pub fn race_next_create(&self, name: &str, data: &str) {
        self.state.lock().unwrap().create_race = Some(plain_secret(name, data, String::new()));
    }

    /// Another writer replaces Certificate `name` with `edit(stored)` while the next
    /// secret write is in flight
    pub fn edit_during_next_secret_write(
        &self,
        name: &str,
        edit: impl FnOnce(&Certificate) -> Certificate + Send + 'static,
    ) {
        self.state.lock().unwrap().concurrent_edit = Some((name.to_string(), Box::new(edit)));
    }
}

fn plain_secret(name: &str, data: &str, version: String) -> Secret {
    Secret {
        metadata: kube::core::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            resource_version: Some(version),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([(
            "tls.crt".to_string(),
            k8s_openapi::ByteString(data.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

fn object_key(meta: &kube::core::ObjectMeta) -> Result<Key, StoreError> {
    let namespace = meta
        .namespace
        .clone()
        .ok_or(StoreError::MissingMetadata("namespace"))?;
    let name = meta.name.clone().ok_or(StoreError::MissingMetadata("name"))?;
    Ok((namespace, name))
}

fn check_version(stored: Option<&String>, sent: Option<&String>, target: &str) -> Result<(), StoreError> {
    match sent {
        Some(sent) if Some(sent) != stored => Err(StoreError::Conflict(
            target.to_string(),
            "the object has been modified".to_string(),
        )),
        _ => Ok(()),
    }
}

#[async_trait]
impl CertificateStore for InMemoryStore {
    async fn get_certificate(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Certificate>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.certificates.get(&key(namespace, name)).cloned())
    }

    async fn update_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<Certificate, StoreError> {
        let mut state = self.state.lock().unwrap();
        let object_key = object_key(&certificate.metadata)?;
        let target = format!("Certificate {}/{}", object_key.0, object_key.1);
        let stored = state
            .certificates
            .get(&object_key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(target.clone()))?;
        check_version(
            stored.metadata.resource_version.as_ref(),
            certificate.metadata.resource_version.as_ref(),
            &target,
        )?;

        let mut updated = certificate.clone();
        updated.status = stored.status.clone();
        updated.metadata.uid = stored.metadata.uid.clone();
        updated.metadata.generation = if stored.spec == certificate.spec {
            stored.metadata.generation
        } else {
            stored.metadata.generation.map(|g| g + 1)
        };
        updated.metadata.resource_version = Some(state.bump());
        state.certificates.insert(object_key, updated.clone());
        Ok(updated)
    }

    async fn update_certificate_status(
        &self,
        certificate: &Certificate,
    ) -> Result<Certificate, StoreError> {
        let mut state = self.state.lock().unwrap();
        let object_key = object_key(&certificate.metadata)?;
        let target = format!("Certificate {}/{}", object_key.0, object_key.1);
        if state.status_conflicts > 0 {
            state.status_conflicts -= 1;
            return Err(StoreError::Conflict(target, "injected conflict".to_string()));
        }
        let mut stored = state
            .certificates
            .get(&object_key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(target.clone()))?;
        check_version(
            stored.metadata.resource_version.as_ref(),
            certificate.metadata.resource_version.as_ref(),
            &target,
        )?;

        stored.status = certificate.status.clone();
        stored.metadata.resource_version = Some(state.bump());
        state.certificates.insert(object_key, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl SecretStore for InMemoryStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        let state = self.state.lock().unwrap();
        Ok(state.secrets.get(&key(namespace, name)).cloned())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.land_concurrent_edit();
        if let Some(mut racing) = state.create_race.take() {
            racing.metadata.resource_version = Some(state.bump());
            let racing_key = object_key(&racing.metadata)?;
            state.secrets.insert(racing_key, racing);
        }

        let object_key = object_key(&secret.metadata)?;
        if state.secrets.contains_key(&object_key) {
            return Err(StoreError::AlreadyExists(format!(
                "Secret {}/{}",
                object_key.0, object_key.1
            )));
        }
        let mut created = secret.clone();
        created.metadata.resource_version = Some(state.bump());
        state.secrets.insert(object_key, created.clone());
        Ok(created)
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let mut state = self.state.lock().unwrap();
        state.land_concurrent_edit();
        let object_key = object_key(&secret.metadata)?;
        let target = format!("Secret {}/{}", object_key.0, object_key.1);
        let stored = state
            .secrets
            .get(&object_key)
            .ok_or_else(|| StoreError::NotFound(target.clone()))?;
        check_version(
            stored.metadata.resource_version.as_ref(),
            secret.metadata.resource_version.as_ref(),
            &target,
        )?;

        let mut updated = secret.clone();
        updated.metadata.resource_version = Some(state.bump());
        state.secrets.insert(object_key, updated.clone());
        Ok(updated)
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let target = format!("Secret {namespace}/{name}");
        if state.failing_deletes.contains(name) {
            return Err(StoreError::Conflict(target, "injected delete failure".to_string()));
        }
        state
            .secrets
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or(StoreError::NotFound(target))
    }
}

/// Issuer that counts calls and delegates to the real self-signed issuer
#[derive(Default)]
pub struct CountingIssuer {
    inner: SelfSignedIssuer,
    pub calls: AtomicUsize,
}

impl CountingIssuer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CertificateIssuer for CountingIssuer {
    fn issue(
        &self,
        spec: &CertificateSpec,
        validity: ValidityPeriod,
        not_before: DateTime<Utc>,
    ) -> Result<IssuedCertificate, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.issue(spec, validity, not_before)
    }
}

/// Issuer whose key generation always fails
pub struct FailingIssuer;

impl CertificateIssuer for FailingIssuer {
    fn issue(
        &self,
        _spec: &CertificateSpec,
        _validity: ValidityPeriod,
        _not_before: DateTime<Utc>,
    ) -> Result<IssuedCertificate, GenerationError> {
        Err(GenerationError::Interrupted("entropy source exhausted".to_string()))
    }
}

/// Reconciler whose Certificate writes pass through admission before reaching `store`
pub fn reconciler(store: &Arc<InMemoryStore>, issuer: Arc<dyn CertificateIssuer>) -> Arc<Reconciler> {
    Arc::new(Reconciler::new(
        Arc::new(AdmittedCertificates::new(store)) as Arc<dyn CertificateStore>,
        Arc::clone(store) as Arc<dyn SecretStore>,
        issuer,
        ControllerConfig::default(),
    ))
}

pub fn new_certificate(name: &str, secret: &str) -> Certificate {
    let mut certificate = Certificate::new(
        name,
        CertificateSpec {
            subject: None,
            dns_name: "example.com".to_string(),
            email_addresses: vec![],
            validity: "30d".to_string(),
            renew_before: None,
            secret_ref: SecretRef {
                name: secret.to_string(),
            },
        },
    );
    certificate.metadata.namespace = Some(NAMESPACE.to_string());
    certificate
}

/// Runs both admission stages and persists the result, like the API server write path
pub struct AdmissionChain {
    store: Arc<InMemoryStore>,
    defaulter: DefaultingStage,
    validator: AdmissionValidator,
}

impl AdmissionChain {
    pub fn new(store: &Arc<InMemoryStore>) -> Self {
        Self {
            store: Arc::clone(store),
            defaulter: DefaultingStage::new(),
            validator: AdmissionValidator::new(Arc::clone(store) as Arc<dyn SecretStore>),
        }
    }

    pub async fn create(&self, incoming: Certificate) -> Result<Certificate, AdmissionError> {
        let mutated = self.defaulter.apply_defaults(&incoming, None)?;
        self.validator.validate_create(&mutated).await?;
        Ok(self.store.insert_certificate(mutated))
    }

    /// Submit `incoming` as an update of the stored object with the same name
    pub async fn update(&self, incoming: Certificate) -> Result<Certificate, AdmissionError> {
        let name = incoming.metadata.name.clone().unwrap();
        let prior = self
            .store
            .certificate(&name)
            .ok_or_else(|| StoreError::NotFound(format!("Certificate {NAMESPACE}/{name}")))?;
        let mut mutated = self.defaulter.apply_defaults(&incoming, Some(&prior))?;
        self.validator.stamp_rename(&mut mutated, &prior).await?;
        self.validator.validate_update(&mutated, &prior).await?;
        Ok(self.store.update_certificate(&mutated).await?)
    }
}

/// Certificate store whose spec and metadata writes are admitted first
pub struct AdmittedCertificates {
    store: Arc<InMemoryStore>,
    chain: AdmissionChain,
}

impl AdmittedCertificates {
    pub fn new(store: &Arc<InMemoryStore>) -> Self {
        Self {
            store: Arc::clone(store),
            chain: AdmissionChain::new(store),
        }
    }
}

#[async_trait]
impl CertificateStore for AdmittedCertificates {
    async fn get_certificate(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Certificate>, StoreError> {
        self.store.get_certificate(namespace, name).await
    }

    async fn update_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<Certificate, StoreError> {
        let target = format!(
            "Certificate {}",
            certificate.metadata.name.as_deref().unwrap_or_default()
        );
        match self.chain.update(certificate.clone()).await {
            Ok(updated) => Ok(updated),
            Err(AdmissionError::Store(e)) => Err(e),
            Err(e) => Err(StoreError::Rejected(target, e.to_string())),
        }
    }

    async fn update_certificate_status(
        &self,
        certificate: &Certificate,
    ) -> Result<Certificate, StoreError> {
        self.store.update_certificate_status(certificate).await
    }
}
