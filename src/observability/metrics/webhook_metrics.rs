//! # Webhook Metrics
//!
//! Admission requests by webhook (`mutate`, `validate`) and verdict (`allowed`, `patched`,
//! `denied`, `invalid`).

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::IntCounterVec;
use std::sync::LazyLock;

static ADMISSION_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "certificate_controller_admission_requests_total",
            "Total number of admission requests handled",
        ),
        &["webhook", "verdict"],
    )
    .expect("Failed to create ADMISSION_REQUESTS_TOTAL metric - this should never happen")
});

pub(crate) fn register_webhook_metrics() -> Result<()> {
    REGISTRY.register(Box::new(ADMISSION_REQUESTS_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_admission_requests(webhook: &str, verdict: &str) {
    ADMISSION_REQUESTS_TOTAL
        .with_label_values(&[webhook, verdict])
        .inc();
}
