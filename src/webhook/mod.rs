//! # Admission Webhooks
//!
//! Mutating and validating admission for Certificates, served over HTTPS.
//!
//! - `defaulting` - Defaulting stage (subject, renewBefore, validity, request intent)
//! - `validation` - Admission validator (structure, secret collisions, rename marking)
//! - `handlers` - AdmissionReview endpoints

mod defaulting;
mod error;
mod handlers;
mod validation;

pub use defaulting::DefaultingStage;
pub use error::AdmissionError;
pub use handlers::{mutate_handler, validate_handler};
pub use validation::{validate_structure, AdmissionValidator};

use axum::{routing::post, Router};
use std::sync::Arc;

pub const MUTATE_PATH: &str = "/mutate-certs-k8c-io-v1-certificate";
pub const VALIDATE_PATH: &str = "/validate-certs-k8c-io-v1-certificate";

/// Shared state for the admission endpoints
#[derive(Debug)]
pub struct WebhookState {
    pub defaulter: DefaultingStage,
    pub validator: AdmissionValidator,
}

/// Router with both admission endpoints
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(MUTATE_PATH, post(mutate_handler))
        .route(VALIDATE_PATH, post(validate_handler))
        .with_state(state)
}
