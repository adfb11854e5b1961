//! # Watch Loop
//!
//! Runs the Certificate controller until a shutdown signal arrives.
//!
//! Certificates are watched across all namespaces. Only events that change a Certificate's
//! declared state (spec and lifecycle) trigger a reconcile, so the controller's own status
//! writes do not wake it up again. Owned TLS secrets are watched too, so deleting or
//! editing a managed secret triggers a reconcile of its owner.

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::{spec_fingerprint, Certificate, Lifecycle};
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use anyhow::Result;
use futures::{future, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::{api::Api, Client};
use kube_runtime::{controller::Controller, reflector, watcher, WatchStreamExt};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Passes a Certificate event only when its declared state differs from the last one seen
#[derive(Debug, Default)]
pub struct DeclaredStateFilter {
    seen: HashMap<String, u64>,
}

impl DeclaredStateFilter {
    pub fn admit(&mut self, certificate: &Certificate) -> bool {
        let key = format!(
            "{}/{}",
            certificate.metadata.namespace.as_deref().unwrap_or_default(),
            certificate.metadata.name.as_deref().unwrap_or_default()
        );
        let state = declared_state(certificate);
        self.seen.insert(key, state) != Some(state)
    }
}

/// Hash of everything a reconcile acts on; status is not part of it
fn declared_state(certificate: &Certificate) -> u64 {
    let mut hasher = DefaultHasher::new();
    certificate.metadata.uid.hash(&mut hasher);
    spec_fingerprint(&certificate.spec).hash(&mut hasher);
    Lifecycle::from_meta(&certificate.metadata)
        .ok()
        .hash(&mut hasher);
    certificate.metadata.deletion_timestamp.is_some().hash(&mut hasher);
    hasher.finish()
}

/// Run the controller watch loop
pub async fn run_watch_loop(
    client: Client,
    certificates: Api<Certificate>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    restart_delay: Duration,
) -> Result<()> {
    info!("Starting Certificate controller watch loop");

    let (reader, writer) = reflector::store();
    let mut filter = DeclaredStateFilter::default();
    let triggers = watcher(certificates, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .try_filter(move |certificate| future::ready(filter.admit(certificate)));

    Controller::for_stream(triggers, reader)
        .owns(Api::<Secret>::all(client), watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => {
                    debug!(
                        resource.name = %object.name,
                        resource.namespace = object.namespace.as_deref().unwrap_or("default"),
                        ?action,
                        "Reconciled"
                    );
                }
                Err(e) => handle_watch_stream_error(&e.to_string(), restart_delay).await,
            }
        })
        .await;

    info!("Controller stopped, marking server not ready");
    server_state.is_ready.store(false, Ordering::Relaxed);
    Ok(())
}
