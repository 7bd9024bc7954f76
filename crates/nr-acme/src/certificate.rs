//! Parsed view of an issued certificate chain.

use crate::types::{AcmeError, AcmeResult};
use chrono::{DateTime, Utc};
use ring::digest::{SHA256, digest};
use std::fmt;
use x509_parser::pem::parse_x509_pem;

/// TLSA rdata for "DANE-EE, SubjectPublicKeyInfo, SHA-256": `3 1 1 <hex>`.
/// Depends only on the public key, so it survives renewals that reuse a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TlsaContent(String);

impl TlsaContent {
    pub fn from_spki(spki_der: &[u8]) -> Self {
        Self(hex::encode(digest(&SHA256, spki_der).as_ref()))
    }

    pub fn digest_hex(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TlsaContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "3 1 1 {}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct CertificateRecord {
    pub chain_pem: String,
    /// SubjectPublicKeyInfo of the leaf, DER
    pub public_key: Vec<u8>,
    pub issued_at: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub tlsa: TlsaContent,
}

impl CertificateRecord {
    /// Parse the leaf (first PEM block) of a chain.
    pub fn from_pem(chain_pem: &str) -> AcmeResult<Self> {
        let (_, pem) = parse_x509_pem(chain_pem.as_bytes())
            .map_err(|e| AcmeError::CertificateParse(format!("invalid PEM: {}", e)))?;
        let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents)
            .map_err(|e| AcmeError::CertificateParse(format!("invalid X.509: {}", e)))?;

        let validity = cert.validity();
        let issued_at = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
            .ok_or_else(|| AcmeError::CertificateParse("notBefore out of range".into()))?;
        let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
            .ok_or_else(|| AcmeError::CertificateParse("notAfter out of range".into()))?;
        let public_key = cert.public_key().raw.to_vec();

        Ok(Self {
            chain_pem: chain_pem.to_string(),
            tlsa: TlsaContent::from_spki(&public_key),
            public_key,
            issued_at,
            not_after,
        })
    }

    /// Whole days left before expiry, negative once expired.
    pub fn days_remaining(&self, now: DateTime<Utc>) -> i64 {
        (self.not_after - now).num_days()
    }
}
