//! # Custom Resource Definitions
//!
//! CRD types for the Certificate Controller.
//!
//! `Certificate` declares the self-signed certificate that should exist and names the
//! TLS secret that backs it. Status and the lifecycle bookkeeping that flows between
//! the admission stages and the reconciler live in the sibling modules.

mod lifecycle;
mod status;

pub use lifecycle::*;
pub use status::*;

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Certificate Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: certs.k8c.io/v1
/// kind: Certificate
/// metadata:
///   name: example-com
///   namespace: default
/// spec:
///   dnsName: example.com
///   validity: 30d
///   renewBefore: 1h
///   secretRef:
///     name: example-com-tls
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq, Hash,
)]
#[kube(
    kind = "Certificate",
    group = "certs.k8c.io",
    version = "v1",
    namespaced,
    status = "CertificateStatus",
    shortname = "cert",
    derive = "PartialEq",
    printcolumn = r#"{"name":"DNS", "type":"string", "jsonPath":".spec.dnsName"}, {"name":"Secret", "type":"string", "jsonPath":".spec.secretRef.name"}, {"name":"Expiry", "type":"string", "jsonPath":".status.expiryDate"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    /// Requested set of X.509 subject attributes.
    /// Defaulted at admission when unset (common name = dnsName, random serial number).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<X509Subject>,
    /// Requested DNS subject alternative name; also the default common name
    pub dns_name: String,
    /// Requested email subject alternative names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub email_addresses: Vec<String>,
    /// Requested lifetime of the certificate
    /// Format: `<number><unit>` with unit `h` (hours), `d` (days) or `y` (years), e.g. "720h", "30d", "1y"
    pub validity: String,
    /// How long before expiry the certificate is renewed
    /// Format: `<number><unit>` with unit `m` or `h`
    /// Minimum: 5m
    /// Default: "5m"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_before: Option<String>,
    /// Secret that receives the issued key and certificate.
    /// It lives in the same namespace as the Certificate.
    pub secret_ref: SecretRef,
}

/// Full X.509 subject name
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct X509Subject {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub country: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organization: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub organizational_unit: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub common_name: String,
    /// Base-10 integer; becomes both the subject serialNumber attribute and the certificate serial
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub serial_number: String,
}

/// Reference to the TLS secret managed by a Certificate
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
}

impl CertificateSpec {
    /// Name of the secret this spec asks for
    pub fn secret_name(&self) -> &str {
        &self.secret_ref.name
    }
}

/// Hash over the declared spec fields only.
///
/// Metadata and status are not part of the spec type, so writes the controller makes to
/// them never change the fingerprint.
pub fn spec_fingerprint(spec: &CertificateSpec) -> u64 {
    let mut hasher = DefaultHasher::new();
    spec.hash(&mut hasher);
    hasher.finish()
}
