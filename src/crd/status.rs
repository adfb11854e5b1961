//! # Certificate Status
//!
//! Status types for tracking issuance, renewal and lifecycle conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of the Certificate resource
///
/// Owned by the reconciler; never set by the requester.
#[derive(Debug, Clone, Deserialize, Serialize, Default, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CertificateStatus {
    /// When the current credential stops being valid (RFC3339)
    #[serde(default)]
    pub expiry_date: Option<String>,
    /// When the credential was last renewed (RFC3339); unset until the first renewal
    #[serde(default)]
    pub renewed_at: Option<String>,
    /// Last generation processed by the reconciler
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Name of the secret currently backing this Certificate
    #[serde(default)]
    pub secret_ref: Option<String>,
    /// Lifecycle conditions; at most one is True at any time
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, schemars::JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

/// Lifecycle condition types. Setting one to True flips every other to False.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConditionType {
    Pending,
    Issued,
    Renewing,
    Renewed,
    Expired,
    Failed,
}

impl ConditionType {
    pub const ALL: [ConditionType; 6] = [
        ConditionType::Pending,
        ConditionType::Issued,
        ConditionType::Renewing,
        ConditionType::Renewed,
        ConditionType::Expired,
        ConditionType::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Pending => "Pending",
            ConditionType::Issued => "Issued",
            ConditionType::Renewing => "Renewing",
            ConditionType::Renewed => "Renewed",
            ConditionType::Expired => "Expired",
            ConditionType::Failed => "Failed",
        }
    }

    /// Terminal conditions mean a live secret backs the Certificate
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConditionType::Issued | ConditionType::Renewed)
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const CONDITION_TRUE: &str = "True";
const CONDITION_FALSE: &str = "False";

impl CertificateStatus {
    /// Record `condition_type` as the single True condition.
    ///
    /// Every other True condition is flipped to False (with a new transition time);
    /// existing entries keep their reason and message so the history stays readable.
    pub fn set_condition(
        &mut self,
        condition_type: ConditionType,
        reason: &str,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        let timestamp = now.to_rfc3339();
        let type_name = condition_type.as_str();

        for condition in &mut self.conditions {
            if condition.r#type != type_name && condition.status == CONDITION_TRUE {
                condition.status = CONDITION_FALSE.to_string();
                condition.last_transition_time = Some(timestamp.clone());
            }
        }

        let message = message.into();
        match self.conditions.iter_mut().find(|c| c.r#type == type_name) {
            Some(existing) => {
                if existing.status != CONDITION_TRUE {
                    existing.status = CONDITION_TRUE.to_string();
                    existing.last_transition_time = Some(timestamp);
                }
                existing.reason = Some(reason.to_string());
                existing.message = Some(message);
            }
            None => self.conditions.push(Condition {
                r#type: type_name.to_string(),
                status: CONDITION_TRUE.to_string(),
                last_transition_time: Some(timestamp),
                reason: Some(reason.to_string()),
                message: Some(message),
            }),
        }
    }

    /// The condition currently True, if any
    pub fn active_condition(&self) -> Option<ConditionType> {
        let active = self.conditions.iter().find(|c| c.status == CONDITION_TRUE)?;
        ConditionType::ALL
            .into_iter()
            .find(|t| t.as_str() == active.r#type)
    }

    /// Parsed `expiryDate`; `None` when unset or unparseable
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.expiry_date.as_deref()?)
    }

    /// Parsed `renewedAt`
    pub fn renewed_at(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(self.renewed_at.as_deref()?)
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn true_count(status: &CertificateStatus) -> usize {
        status
            .conditions
            .iter()
            .filter(|c| c.status == "True")
            .count()
    }

    #[test]
    fn test_set_condition_keeps_single_true() {
        let now = Utc::now();
        let mut status = CertificateStatus::default();
        status.set_condition(ConditionType::Pending, "CreateRequest", "issuing", now);
        status.set_condition(
            ConditionType::Issued,
            "CreateRequest",
            "issued",
            now + Duration::seconds(1),
        );

        assert_eq!(true_count(&status), 1);
        assert_eq!(status.active_condition(), Some(ConditionType::Issued));
        assert_eq!(status.conditions.len(), 2);
    }

    #[test]
    fn test_set_condition_retains_history() {
        let start = Utc::now();
        let mut status = CertificateStatus::default();
        status.set_condition(ConditionType::Pending, "CreateRequest", "issuing", start);
        status.set_condition(ConditionType::Issued, "CreateRequest", "issued", start);
        let later = start + Duration::minutes(10);
        status.set_condition(ConditionType::Renewing, "RenewalDue", "renewing", later);

        let pending = status
            .conditions
            .iter()
            .find(|c| c.r#type == "Pending")
            .unwrap();
        assert_eq!(pending.status, "False");
        assert_eq!(pending.reason.as_deref(), Some("CreateRequest"));
        assert_eq!(pending.message.as_deref(), Some("issuing"));

        let issued = status
            .conditions
            .iter()
            .find(|c| c.r#type == "Issued")
            .unwrap();
        assert_eq!(issued.status, "False");
        assert_eq!(
            issued.last_transition_time.as_deref(),
            Some(later.to_rfc3339().as_str())
        );
        assert_eq!(true_count(&status), 1);
    }

    #[test]
    fn test_set_condition_same_type_keeps_transition_time() {
        let start = Utc::now();
        let mut status = CertificateStatus::default();
        status.set_condition(ConditionType::Failed, "ReconcileRequest", "first", start);
        status.set_condition(
            ConditionType::Failed,
            "ReconcileRequest",
            "second",
            start + Duration::minutes(5),
        );

        let failed = &status.conditions[0];
        assert_eq!(
            failed.last_transition_time.as_deref(),
            Some(start.to_rfc3339().as_str())
        );
        assert_eq!(failed.message.as_deref(), Some("second"));
    }

    #[test]
    fn test_expiry_parses_rfc3339() {
        let status = CertificateStatus {
            expiry_date: Some("2030-01-01T00:00:00+00:00".to_string()),
            ..Default::default()
        };
        assert_eq!(status.expiry().unwrap().to_rfc3339(), "2030-01-01T00:00:00+00:00");

        let broken = CertificateStatus {
            expiry_date: Some("not-a-date".to_string()),
            ..Default::default()
        };
        assert!(broken.expiry().is_none());
    }
}
