//! # Lifecycle Bookkeeping
//!
//! Typed state handed from the admission stages to the reconciler: the pending request
//! intent, the secret left behind by a `secretRef` rename, and the validity fixed at
//! admission. This module is the only place that knows how the state is stored on the
//! object (annotations); everything else works with [`Lifecycle`].

use crate::controller::duration::{DurationError, ValidityPeriod};
use kube::core::ObjectMeta;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

pub const REQUEST_INTENT_ANNOTATION: &str = "certs.k8c.io/request-intent";
pub const OBSOLETE_SECRET_ANNOTATION: &str = "certs.k8c.io/obsolete-secret";
pub const VALIDITY_ANNOTATION: &str = "certs.k8c.io/validity-in-hours";

/// What the reconciler has been asked to do on its next pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RequestIntent {
    /// Periodic convergence: issue if missing, renew when due
    #[default]
    None,
    /// First issuance after the object was created
    Create,
    /// The declared spec changed; re-issue under the current secretRef
    Update,
    /// Delete the obsolete secret left behind by a rename
    Cleanup,
}

impl RequestIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestIntent::None => "None",
            RequestIntent::Create => "Create",
            RequestIntent::Update => "Update",
            RequestIntent::Cleanup => "Cleanup",
        }
    }
}

impl fmt::Display for RequestIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown request intent '{0}'")]
pub struct UnknownIntent(String);

impl FromStr for RequestIntent {
    type Err = UnknownIntent;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "" | "None" => Ok(RequestIntent::None),
            "Create" => Ok(RequestIntent::Create),
            "Update" => Ok(RequestIntent::Update),
            "Cleanup" => Ok(RequestIntent::Cleanup),
            other => Err(UnknownIntent(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("no validity value annotation found")]
    MissingValidity,
    #[error("invalid value {value} for Validity field err: {source}")]
    InvalidValidity {
        value: String,
        #[source]
        source: DurationError,
    },
}

/// Lifecycle state carried on a Certificate between admission and reconciliation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Lifecycle {
    pub intent: RequestIntent,
    pub obsolete_secret: Option<String>,
    pub validity: Option<ValidityPeriod>,
}

impl Lifecycle {
    /// Decode the lifecycle from object metadata.
    ///
    /// An unknown intent decodes as [`RequestIntent::None`]; a malformed validity is an error.
    pub fn from_meta(meta: &ObjectMeta) -> Result<Self, LifecycleError> {
        let annotations = meta.annotations.as_ref();
        let get = |key: &str| {
            annotations
                .and_then(|a| a.get(key))
                .map(String::as_str)
                .filter(|v| !v.is_empty())
        };

        let intent = match get(REQUEST_INTENT_ANNOTATION).map(str::parse::<RequestIntent>) {
            None => RequestIntent::None,
            Some(Ok(intent)) => intent,
            Some(Err(e)) => {
                warn!(
                    resource.name = meta.name.as_deref().unwrap_or("unknown"),
                    error = %e,
                    "Ignoring unknown request intent"
                );
                RequestIntent::None
            }
        };

        let validity = get(VALIDITY_ANNOTATION)
            .map(|value| {
                value
                    .parse::<ValidityPeriod>()
                    .map_err(|source| LifecycleError::InvalidValidity {
                        value: value.to_string(),
                        source,
                    })
            })
            .transpose()?;

        Ok(Self {
            intent,
            obsolete_secret: get(OBSOLETE_SECRET_ANNOTATION).map(str::to_string),
            validity,
        })
    }

    /// The stored validity, required for issuance
    pub fn require_validity(&self) -> Result<ValidityPeriod, LifecycleError> {
        self.validity.ok_or(LifecycleError::MissingValidity)
    }

    /// Encode onto object metadata; cleared fields remove their annotation
    pub fn write_to(&self, meta: &mut ObjectMeta) {
        let annotations = meta.annotations.get_or_insert_with(Default::default);

        match self.intent {
            RequestIntent::None => annotations.remove(REQUEST_INTENT_ANNOTATION),
            intent => annotations.insert(
                REQUEST_INTENT_ANNOTATION.to_string(),
                intent.as_str().to_string(),
            ),
        };
        match &self.obsolete_secret {
            Some(name) => annotations.insert(OBSOLETE_SECRET_ANNOTATION.to_string(), name.clone()),
            None => annotations.remove(OBSOLETE_SECRET_ANNOTATION),
        };
        match &self.validity {
            Some(validity) => {
                annotations.insert(VALIDITY_ANNOTATION.to_string(), validity.to_string())
            }
            None => annotations.remove(VALIDITY_ANNOTATION),
        };

        if annotations.is_empty() {
            meta.annotations = None;
        }
    }
}
