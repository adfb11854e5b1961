//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics, server
//! startup, and Kubernetes client setup.

use crate::config::{self, ServerConfig};
use crate::controller::factory::SelfSignedIssuer;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, start_webhook_server, ServerState};
use crate::controller::store::KubeStore;
use crate::crd::Certificate;
use crate::observability;
use crate::webhook::{AdmissionValidator, DefaultingStage, WebhookState};
use anyhow::{Context, Result};
use kube::{api::Api, api::ListParams, Client};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    pub client: Client,
    /// API for Certificates across all namespaces
    pub certificates: Api<Certificate>,
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub server_config: ServerConfig,
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler and admission webhook setup
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before anything touches rustls
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "certificate_controller=info".into()),
        )
        .init();

    info!("Starting Certificate Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    let (controller_config, server_config) = config::load_config();
    info!(?controller_config, ?server_config, "Loaded configuration");

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(AtomicBool::new(false)),
    });

    // The metrics server is up before anything else so health checks answer during startup
    let server_state_clone = Arc::clone(&server_state);
    let metrics_port = server_config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(metrics_port, server_state_clone).await {
            error!("HTTP server error: {:#}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle, &server_config).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let certificates: Api<Certificate> = Api::all(client.clone());

    let store = Arc::new(KubeStore::new(client.clone()));
    let issuer = Arc::new(SelfSignedIssuer::new(controller_config.rsa_key_bits));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        store.clone(),
        issuer,
        controller_config,
    ));

    let webhook_state = Arc::new(WebhookState {
        defaulter: DefaultingStage::new(),
        validator: AdmissionValidator::new(store),
    });
    let webhook_port = server_config.webhook_port;
    let cert_path = server_config.webhook_cert_path.clone();
    let key_path = server_config.webhook_key_path.clone();
    tokio::spawn(async move {
        if let Err(e) = start_webhook_server(webhook_port, &cert_path, &key_path, webhook_state).await
        {
            error!("Webhook server error: {:#}", e);
        }
    });

    summarize_existing_resources(&certificates).await;

    info!("Controller initialized, starting watch loop...");
    Ok(InitializationResult {
        client,
        certificates,
        reconciler,
        server_state,
        server_config,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
    server_config: &ServerConfig,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(server_config.startup_timeout_secs);
    let poll_interval = Duration::from_millis(server_config.poll_interval_ms);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        if server_state.is_ready.load(Ordering::Relaxed) {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Log existing Certificates per namespace before starting the watch
///
/// The controller's initial list reconciles every one of them; this only checks that the
/// CRD is installed and gives operators a startup summary.
async fn summarize_existing_resources(certificates: &Api<Certificate>) {
    match certificates.list(&ListParams::default()).await {
        Ok(list) => {
            let mut by_namespace: BTreeMap<String, Vec<String>> = BTreeMap::new();
            for item in &list.items {
                by_namespace
                    .entry(item.metadata.namespace.clone().unwrap_or_default())
                    .or_default()
                    .push(item.metadata.name.clone().unwrap_or_default());
            }

            info!(
                total = list.items.len(),
                namespaces = by_namespace.len(),
                "Certificate Controller - Startup Resource Summary"
            );
            for (namespace, mut names) in by_namespace {
                names.sort();
                let shown = if names.len() <= 3 {
                    names.join(", ")
                } else {
                    format!("{}, ... ({} total)", names[..3].join(", "), names.len())
                };
                info!("Namespace {}: {}", namespace, shown);
            }
        }
        Err(e) => {
            error!("CRD is not queryable; {:?}. Is the CRD installed?", e);
            error!("Installation: crdgen | kubectl apply -f -");
            warn!("Continuing despite CRD queryability check failure - controller will retry");
        }
    }
}
