//! # Certificate Factory
//!
//! Issues self-signed X.509 certificates: a fresh RSA key per call, the subject copied
//! from the (defaulted) spec, `dnsName` and `emailAddresses` as subject alternative
//! names, and a validity window of exactly the stored lifetime.

use crate::constants::{DEFAULT_RSA_KEY_BITS, SERIAL_NUMBER_BITS};
use crate::controller::duration::{DurationError, ValidityPeriod};
use crate::crd::{CertificateSpec, X509Subject};
use chrono::{DateTime, Utc};
use openssl::{
    asn1::{Asn1Integer, Asn1Time},
    bn::{BigNum, MsbOption},
    error::ErrorStack,
    hash::MessageDigest,
    nid::Nid,
    pkey::PKey,
    rsa::Rsa,
    x509::{
        extension::{BasicConstraints, SubjectAlternativeName},
        X509Builder, X509NameBuilder, X509Name,
    },
};
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to generate RSA key: {0}")]
    KeyGeneration(#[source] ErrorStack),
    #[error("failed to build certificate: {0}")]
    Build(#[source] ErrorStack),
    #[error("failed to encode certificate or key: {0}")]
    Encode(#[source] ErrorStack),
    #[error("serial number '{0}' is not a base-10 integer")]
    InvalidSerialNumber(String),
    #[error("invalid certificate lifetime: {0}")]
    InvalidLifetime(#[from] DurationError),
    #[error("certificate generation task did not complete: {0}")]
    Interrupted(String),
}

/// PEM-encoded output of a single issuance
#[derive(Clone)]
pub struct IssuedCertificate {
    /// `CERTIFICATE` PEM block
    pub certificate_pem: Vec<u8>,
    /// `RSA PRIVATE KEY` PEM block (PKCS#1)
    pub private_key_pem: Vec<u8>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("certificate_pem", &format!("<{} bytes>", self.certificate_pem.len()))
            .field("private_key_pem", &"<redacted>")
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .finish()
    }
}

/// Produces key material for a Certificate
///
/// Implementations are CPU-bound and synchronous; the reconciler runs them off the
/// async executor.
#[cfg_attr(test, automock)]
pub trait CertificateIssuer: Send + Sync {
    fn issue(
        &self,
        spec: &CertificateSpec,
        validity: ValidityPeriod,
        not_before: DateTime<Utc>,
    ) -> Result<IssuedCertificate, GenerationError>;
}

/// Self-signing issuer backed by OpenSSL
#[derive(Debug, Clone)]
pub struct SelfSignedIssuer {
    key_bits: u32,
}

impl Default for SelfSignedIssuer {
    fn default() -> Self {
        Self::new(DEFAULT_RSA_KEY_BITS)
    }
}

impl SelfSignedIssuer {
    pub fn new(key_bits: u32) -> Self {
        Self { key_bits }
    }
}

impl CertificateIssuer for SelfSignedIssuer {
    fn issue(
        &self,
        spec: &CertificateSpec,
        validity: ValidityPeriod,
        not_before: DateTime<Utc>,
    ) -> Result<IssuedCertificate, GenerationError> {
        let not_after = not_before
            .checked_add_signed(validity.to_chrono()?)
            .ok_or_else(|| DurationError::Overflow(validity.to_string()))?;

        let key = Rsa::generate(self.key_bits)
            .and_then(PKey::from_rsa)
            .map_err(GenerationError::KeyGeneration)?;

        let subject = spec.subject.clone().unwrap_or_default();
        let serial = match subject.serial_number.as_str() {
            "" => random_serial().map_err(GenerationError::Build)?,
            decimal if is_decimal(decimal) => BigNum::from_dec_str(decimal)
                .map_err(|_| GenerationError::InvalidSerialNumber(decimal.to_string()))?,
            other => return Err(GenerationError::InvalidSerialNumber(other.to_string())),
        };

        let certificate = X509Builder::new()
            .and_then(|mut x509| {
                let name = subject_name(&subject, &spec.dns_name)?;
                x509.set_subject_name(&name)?;
                // Self-issued: issuer and subject are the same name
                x509.set_issuer_name(&name)?;
                x509.set_not_before(Asn1Time::from_unix(not_before.timestamp())?.as_ref())?;
                x509.set_not_after(Asn1Time::from_unix(not_after.timestamp())?.as_ref())?;
                x509.set_pubkey(&key)?;
                x509.set_version(
                    3 - 1, // zero-indexed
                )?;
                x509.set_serial_number(Asn1Integer::from_bn(&serial)?.as_ref())?;

                let mut exts = vec![BasicConstraints::new().critical().build()?];
                let mut san = SubjectAlternativeName::new();
                let mut has_san = false;
                if !spec.dns_name.is_empty() {
                    san.dns(&spec.dns_name);
                    has_san = true;
                }
                for email in &spec.email_addresses {
                    san.email(email);
                    has_san = true;
                }
                if has_san {
                    exts.push(san.build(&x509.x509v3_context(None, None))?);
                }
                for ext in exts {
                    x509.append_extension(ext)?;
                }

                x509.sign(&key, MessageDigest::sha256())?;
                Ok(x509)
            })
            .map_err(GenerationError::Build)?
            .build();

        let certificate_pem = certificate.to_pem().map_err(GenerationError::Encode)?;
        let private_key_pem = key
            .rsa()
            .and_then(|rsa| rsa.private_key_to_pem())
            .map_err(GenerationError::Encode)?;

        Ok(IssuedCertificate {
            certificate_pem,
            private_key_pem,
            not_before,
            not_after,
        })
    }
}

fn subject_name(subject: &X509Subject, dns_name: &str) -> Result<X509Name, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    for country in &subject.country {
        name.append_entry_by_nid(Nid::COUNTRYNAME, country)?;
    }
    for organization in &subject.organization {
        name.append_entry_by_nid(Nid::ORGANIZATIONNAME, organization)?;
    }
    for unit in &subject.organizational_unit {
        name.append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, unit)?;
    }
    let common_name = if subject.common_name.is_empty() {
        dns_name
    } else {
        &subject.common_name
    };
    if !common_name.is_empty() {
        name.append_entry_by_nid(Nid::COMMONNAME, common_name)?;
    }
    if !subject.serial_number.is_empty() {
        name.append_entry_by_nid(Nid::SERIALNUMBER, &subject.serial_number)?;
    }
    Ok(name.build())
}

/// Non-empty string of ASCII digits
pub fn is_decimal(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

fn random_serial() -> Result<BigNum, ErrorStack> {
    let mut serial = BigNum::new()?;
    serial.rand(SERIAL_NUMBER_BITS, MsbOption::MAYBE_ZERO, false)?;
    Ok(serial)
}

/// Cryptographically random 128-bit serial number in base 10
pub fn random_serial_number() -> Result<String, ErrorStack> {
    Ok(random_serial()?.to_dec_str()?.to_string())
}
