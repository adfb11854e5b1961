//! # Lifecycle State Machine
//!
//! Pure transition function from what the reconciler observes (request intent, credential
//! presence, time to expiry) to the operations it must perform. No I/O happens here; the
//! executor in `reconcile.rs` carries the plan out and persists the next lifecycle.
//!
//! | Intent  | Credential         | Operations                      |
//! |---------|--------------------|---------------------------------|
//! | None    | absent             | Issue                           |
//! | None    | present, not due   | -                               |
//! | None    | present, due       | Renew                           |
//! | Create  | absent             | Issue                           |
//! | Create  | present (race)     | -                               |
//! | Update  | absent             | Issue, DeleteObsolete           |
//! | Update  | present            | Rotate, DeleteObsolete          |
//! | Cleanup | -                  | DeleteObsolete                  |
//!
//! `DeleteObsolete` is only planned when an obsolete secret is recorded and it is not the
//! secret the Certificate currently points at. A successful plan always leaves the intent
//! cleared.

use crate::crd::RequestIntent;
use chrono::{DateTime, Duration, Utc};

/// Everything the transition function looks at
#[derive(Debug, Clone)]
pub struct Observation<'a> {
    pub intent: RequestIntent,
    pub obsolete_secret: Option<&'a str>,
    pub secret_name: &'a str,
    pub secret_present: bool,
    pub expiry: Option<DateTime<Utc>>,
    pub renew_before: Duration,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create the credential under `secretRef`
    Issue,
    /// Overwrite the existing credential after a spec change
    Rotate,
    /// Regenerate the existing credential because it is close to expiry
    Renew { expired: bool },
    /// Delete the credential left behind by a `secretRef` rename
    DeleteObsolete(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    pub operations: Vec<Operation>,
    /// Condition reason recorded for the operations
    pub reason: &'static str,
}

impl Plan {
    pub fn is_noop(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Renewal is due once `now` is within `renew_before` of expiry.
///
/// A credential without a recorded expiry is always due, and so is one whose renewal
/// window reaches back past the earliest representable instant.
pub fn renewal_due(expiry: Option<DateTime<Utc>>, renew_before: Duration, now: DateTime<Utc>) -> bool {
    expiry
        .and_then(|expiry| expiry.checked_sub_signed(renew_before))
        .map_or(true, |renew_at| now >= renew_at)
}

pub fn plan(observation: &Observation<'_>) -> Plan {
    let (mut operations, reason) = match (observation.intent, observation.secret_present) {
        (RequestIntent::None, false) => (vec![Operation::Issue], "ReconcileRequest"),
        (RequestIntent::None, true) => {
            if renewal_due(observation.expiry, observation.renew_before, observation.now) {
                let expired = observation
                    .expiry
                    .map_or(true, |expiry| observation.now >= expiry);
                (vec![Operation::Renew { expired }], "RenewalDue")
            } else {
                (vec![], "ReconcileRequest")
            }
        }
        (RequestIntent::Create, false) => (vec![Operation::Issue], "CreateRequest"),
        (RequestIntent::Create, true) => (vec![], "CreateRequest"),
        (RequestIntent::Update, false) => (vec![Operation::Issue], "UpdateRequest"),
        (RequestIntent::Update, true) => (vec![Operation::Rotate], "UpdateRequest"),
        (RequestIntent::Cleanup, _) => (vec![], "CleanupRequest"),
    };

    if let Some(obsolete) = observation
        .obsolete_secret
        .filter(|name| *name != observation.secret_name)
    {
        operations.push(Operation::DeleteObsolete(obsolete.to_string()));
    }

    Plan { operations, reason }
}
