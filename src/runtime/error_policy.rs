//! # Error Policy
//!
//! Requeue policy for failed reconciliations and classification of controller stream errors.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::Certificate;
use crate::observability;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Handle reconciliation errors with Fibonacci backoff
///
/// Backoff state is tracked per resource so one failing Certificate does not slow down
/// the others. The state is cleared by the next successful reconciliation.
pub fn handle_reconciliation_error(
    obj: Arc<Certificate>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.metadata.name.as_deref().unwrap_or("unknown");
    let namespace = obj.metadata.namespace.as_deref().unwrap_or("default");

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = name,
        resource.namespace = namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!(reason = error.reason(), "Reconciliation error for {}: {:?}", name, error);
    observability::metrics::increment_reconciliation_errors();

    let resource_key = format!("{namespace}/{name}");
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states
                .entry(resource_key)
                .or_insert_with(|| ctx.new_backoff_state());
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using minimum backoff", e);
            (ctx.config.backoff_min_minutes.saturating_mul(60), 0)
        }
    };

    let next_retry = i64::try_from(backoff_seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|delay| chrono::Utc::now().checked_add_signed(delay))
        .map(|at| at.to_rfc3339());
    info!(
        backoff_seconds,
        error_count,
        next_retry = next_retry.as_deref().unwrap_or("unknown"),
        "Retrying with Fibonacci backoff"
    );

    observability::metrics::increment_requeues_total("error-backoff");
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// How the watch loop should react to a controller stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// RBAC revoked or token expired
    Unauthorized,
    /// Resource version too old, the watcher relists
    Expired,
    /// API server storage reinitializing or throttling
    Throttled,
    /// Object deleted between event and reconcile
    NotFound,
    Other,
}

/// Classify a controller stream error by its rendered message
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    if error_string.contains("401") || error_string.contains("Unauthorized") {
        WatchErrorKind::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorKind::Throttled
    } else if error_string.contains("ObjectNotFound")
        || (error_string.contains("404") && error_string.contains("not found"))
    {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Log a controller stream error and pause before the stream is polled again
pub async fn handle_watch_stream_error(error_string: &str, restart_delay: Duration) {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let kind = classify_watch_error(error_string);

    let pause = error_span.in_scope(|| match kind {
        WatchErrorKind::Unauthorized => {
            error!("Watch authentication failed (401 Unauthorized), RBAC may have been revoked or token expired");
            error!("Verify the controller ClusterRole still grants certificates, certificates/status and secrets");
            warn!("Waiting {}s before polling the watch again", restart_delay.as_secs());
            true
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "Watch resource version expired, watcher will relist");
            false
        }
        WatchErrorKind::Throttled => {
            warn!(
                error_type = "429",
                "API server throttling, backing off for {}s",
                restart_delay.as_secs()
            );
            true
        }
        WatchErrorKind::NotFound => {
            warn!("Resource not found (likely deleted), continuing watch");
            false
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            false
        }
    });

    if pause {
        tokio::time::sleep(restart_delay).await;
    }
}
