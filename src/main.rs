//! # Certificate Controller
//!
//! A Kubernetes controller that keeps a self-signed X.509 certificate and its private key
//! in a TLS secret for every `Certificate` resource.
//!
//! ## Overview
//!
//! 1. **Admission** - A mutating webhook defaults the subject and `renewBefore`, fixes the
//!    certificate lifetime and stamps the request intent. A validating webhook rejects
//!    malformed Certificates and Certificates whose secret already exists.
//! 2. **Issuance** - The reconciler generates an RSA key and a self-signed certificate and
//!    writes both into the referenced `kubernetes.io/tls` secret.
//! 3. **Renewal** - Certificates are re-issued once they are inside their renewal window.
//! 4. **Rename cleanup** - When `secretRef` changes, the previous secret is deleted once the
//!    new one is live.
//!
//! ## Features
//!
//! - **Multi-namespace**: Watches `Certificate` resources across all namespaces
//! - **Prometheus metrics**: Exposes metrics for monitoring and observability
//! - **Health checks**: HTTP endpoints for liveness and readiness checks

use anyhow::Result;
use certificate_controller::constants::DEFAULT_WATCH_RESTART_DELAY_SECS;
use certificate_controller::runtime::{initialize, run_watch_loop};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let init_result = initialize().await?;

    run_watch_loop(
        init_result.client,
        init_result.certificates,
        init_result.reconciler,
        init_result.server_state,
        Duration::from_secs(DEFAULT_WATCH_RESTART_DELAY_SECS),
    )
    .await
}
