//! # Object Store
//!
//! Store traits over `Certificate` and `Secret` objects, injected into the admission
//! stages and the reconciler, plus their Kubernetes implementation.
//!
//! Writes carry the `resourceVersion` of the object they were derived from, so a write
//! based on a stale read fails with [`StoreError::Conflict`] instead of overwriting a
//! concurrent writer. Callers re-fetch and retry.

use crate::constants::FIELD_MANAGER;
use crate::crd::Certificate;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, DeleteParams, Patch, PatchParams, PostParams},
    Client,
};
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("conflicting write to {0}: {1}")]
    Conflict(String, String),
    /// Admission or the API server refused the write itself
    #[error("write to {0} was rejected: {1}")]
    Rejected(String, String),
    #[error("object has no {0}")]
    MissingMetadata(&'static str),
    #[error("kubernetes API error: {0}")]
    Kube(#[source] kube::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(..))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Access to `Certificate` objects
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertificateStore: Send + Sync {
    /// Latest persisted Certificate; `None` once it has been deleted
    async fn get_certificate(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Certificate>, StoreError>;

    /// Replace spec and metadata; fails with `Conflict` on a stale `resourceVersion`
    async fn update_certificate(&self, certificate: &Certificate)
        -> Result<Certificate, StoreError>;

    /// Write the status sub-resource; fails with `Conflict` on a stale `resourceVersion`
    async fn update_certificate_status(
        &self,
        certificate: &Certificate,
    ) -> Result<Certificate, StoreError>;
}

/// Access to the `Secret` objects that hold issued credentials
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError>;

    /// Fails with `AlreadyExists` when the name is taken
    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, StoreError>;

    /// Fails with `NotFound` when there is nothing to delete
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// Store implementation on the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl std::fmt::Debug for KubeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeStore").finish_non_exhaustive()
    }
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn certificates(&self, namespace: &str) -> Api<Certificate> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn object_key(meta: &kube::core::ObjectMeta) -> Result<(&str, &str), StoreError> {
    let namespace = meta
        .namespace
        .as_deref()
        .ok_or(StoreError::MissingMetadata("namespace"))?;
    let name = meta
        .name
        .as_deref()
        .ok_or(StoreError::MissingMetadata("name"))?;
    Ok((namespace, name))
}

/// Map API failures onto the store taxonomy
fn classify(error: kube::Error, kind: &str, namespace: &str, name: &str) -> StoreError {
    let target = format!("{kind} {namespace}/{name}");
    match error {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound(target),
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(target)
        }
        kube::Error::Api(response) if response.code == 409 => {
            StoreError::Conflict(target, response.message.clone())
        }
        kube::Error::Api(response) if matches!(response.code, 400 | 403 | 422) => {
            StoreError::Rejected(target, response.message.clone())
        }
        other => StoreError::Kube(other),
    }
}

#[async_trait]
impl CertificateStore for KubeStore {
    async fn get_certificate(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Certificate>, StoreError> {
        match self.certificates(namespace).get(name).await {
            Ok(certificate) => Ok(Some(certificate)),
            Err(kube::Error::Api(response)) if response.code == 404 => {
                debug!("Certificate {}/{} not found", namespace, name);
                Ok(None)
            }
            Err(e) => Err(classify(e, "Certificate", namespace, name)),
        }
    }

    async fn update_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<Certificate, StoreError> {
        let (namespace, name) = object_key(&certificate.metadata)?;
        self.certificates(namespace)
            .replace(name, &PostParams::default(), certificate)
            .await
            .map_err(|e| classify(e, "Certificate", namespace, name))
    }

    async fn update_certificate_status(
        &self,
        certificate: &Certificate,
    ) -> Result<Certificate, StoreError> {
        let (namespace, name) = object_key(&certificate.metadata)?;
        // resourceVersion in a merge patch makes the API server reject stale writes
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": certificate.metadata.resource_version },
            "status": certificate.status,
        });
        self.certificates(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map_err(|e| classify(e, "Certificate", namespace, name))
    }
}

#[async_trait]
impl SecretStore for KubeStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, StoreError> {
        self.secrets(namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify(e, "Secret", namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let (namespace, name) = object_key(&secret.metadata)?;
        self.secrets(namespace)
            .create(&PostParams::default(), secret)
            .await
            .map_err(|e| classify(e, "Secret", namespace, name))
    }

    async fn update_secret(&self, secret: &Secret) -> Result<Secret, StoreError> {
        let (namespace, name) = object_key(&secret.metadata)?;
        self.secrets(namespace)
            .replace(name, &PostParams::default(), secret)
            .await
            .map_err(|e| classify(e, "Secret", namespace, name))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.secrets(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, "Secret", namespace, name))
    }
}
