use nr_dns::{DnsError, DnsUpdateConfig, PropagationConfig};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::tlsa::PortSpec;

/// Configuration for one renewal run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcmeConfig {
    /// Domains on the certificate; the first one names the live/archive slots
    pub domains: Vec<String>,
    /// Contact address for the ACME account
    pub contact: String,
    #[serde(default = "default_directory_url")]
    pub directory_url: String,
    /// Base directory for certificates and account credentials
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_challenge")]
    pub challenge: ChallengeKind,
    /// Document root served for HTTP-01 validation
    #[serde(default)]
    pub webroot: Option<PathBuf>,
    /// Leave challenge and stale TLSA records in place
    #[serde(default)]
    pub keep: bool,
    /// Renew regardless of the live certificate's expiry
    #[serde(default)]
    pub force: bool,
    /// Days before expiry to trigger renewal
    #[serde(default = "default_renewal_threshold")]
    pub renewal_threshold_days: u32,
    #[serde(default = "default_txt_ttl")]
    pub txt_ttl: u32,
    #[serde(default = "default_true")]
    pub publish_tlsa: bool,
    #[serde(default = "default_tlsa_ports")]
    pub tlsa_ports: Vec<PortSpec>,
    #[serde(default = "default_tlsa_ttl")]
    pub tlsa_ttl: u32,
    #[serde(default = "default_validation_interval")]
    pub validation_interval_secs: u64,
    #[serde(default = "default_validation_timeout")]
    pub validation_timeout_secs: u64,
    #[serde(default = "default_issuance_interval")]
    pub issuance_interval_secs: u64,
    #[serde(default)]
    pub update: DnsUpdateConfig,
    #[serde(default)]
    pub propagation: PropagationConfig,
}

fn default_directory_url() -> String {
    "https://acme-staging-v02.api.letsencrypt.org/directory".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("/etc/letsencrypt")
}
fn default_challenge() -> ChallengeKind {
    ChallengeKind::Dns01
}
fn default_renewal_threshold() -> u32 {
    30
}
fn default_txt_ttl() -> u32 {
    60
}
fn default_true() -> bool {
    true
}
fn default_tlsa_ports() -> Vec<PortSpec> {
    vec![PortSpec::All(443)]
}
fn default_tlsa_ttl() -> u32 {
    3600
}
fn default_validation_interval() -> u64 {
    5
}
fn default_validation_timeout() -> u64 {
    120
}
fn default_issuance_interval() -> u64 {
    3
}

impl AcmeConfig {
    /// Config with every optional setting at its default.
    pub fn new(domains: Vec<String>, contact: impl Into<String>) -> Self {
        Self {
            domains,
            contact: contact.into(),
            directory_url: default_directory_url(),
            data_dir: default_data_dir(),
            challenge: default_challenge(),
            webroot: None,
            keep: false,
            force: false,
            renewal_threshold_days: default_renewal_threshold(),
            txt_ttl: default_txt_ttl(),
            publish_tlsa: true,
            tlsa_ports: default_tlsa_ports(),
            tlsa_ttl: default_tlsa_ttl(),
            validation_interval_secs: default_validation_interval(),
            validation_timeout_secs: default_validation_timeout(),
            issuance_interval_secs: default_issuance_interval(),
            update: DnsUpdateConfig::default(),
            propagation: PropagationConfig::default(),
        }
    }

    /// The domain naming the live and archive slots.
    pub fn primary_domain(&self) -> AcmeResult<&str> {
        self.domains
            .first()
            .map(String::as_str)
            .ok_or_else(|| AcmeError::ConfigError("No domain configured".into()))
    }

    pub fn validation_interval(&self) -> Duration {
        Duration::from_secs(self.validation_interval_secs)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_secs(self.validation_timeout_secs)
    }

    pub fn issuance_interval(&self) -> Duration {
        Duration::from_secs(self.issuance_interval_secs)
    }
}

/// Challenge types this tool can solve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeKind {
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "http-01")]
    Http01,
}

impl ChallengeKind {
    pub const ALL: [ChallengeKind; 2] = [ChallengeKind::Dns01, ChallengeKind::Http01];

    pub fn identifier(&self) -> &'static str {
        match self {
            Self::Dns01 => "dns-01",
            Self::Http01 => "http-01",
        }
    }
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}

impl FromStr for ChallengeKind {
    type Err = AcmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.identifier().eq_ignore_ascii_case(s))
            .ok_or_else(|| AcmeError::ConfigError(format!("Unknown strategy {}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    /// Invalid, revoked, expired or deactivated
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStatus {
    Pending,
    Valid,
    Invalid,
}

/// A challenge the server offers for an authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeOffer {
    pub kind: ChallengeKind,
    pub url: String,
    pub token: String,
    pub key_authorization: String,
}

/// Server-side proof state for one domain of an order
#[derive(Debug, Clone)]
pub struct Authorization {
    pub domain: String,
    pub status: AuthorizationStatus,
    pub challenges: Vec<ChallengeOffer>,
}

impl Authorization {
    pub fn offer(&self, kind: ChallengeKind) -> Option<&ChallengeOffer> {
        self.challenges.iter().find(|c| c.kind == kind)
    }
}

/// A challenge a strategy published and is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub domain: String,
    pub kind: ChallengeKind,
    pub url: String,
    pub token: String,
    /// TXT value for DNS-01, response body for HTTP-01
    pub content: String,
}

impl Challenge {
    pub fn new(domain: &str, offer: &ChallengeOffer, content: String) -> Self {
        Self {
            domain: domain.to_string(),
            kind: offer.kind,
            url: offer.url.clone(),
            token: offer.token.clone(),
            content,
        }
    }
}

/// Status snapshot of a challenge as reported by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeState {
    pub status: ChallengeStatus,
    pub error: Option<String>,
}

/// Where a finalized order stands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IssuanceState {
    Processing,
    /// PEM chain, leaf first
    Valid(String),
    Failed(String),
}

#[derive(Error, Debug)]
pub enum AcmeError {
    #[error("ACME not initialized")]
    NotInitialized,

    #[error(transparent)]
    Dns(#[from] DnsError),

    #[error("Timeout while waiting for validation of challenge for {domain}")]
    ValidationTimeout { domain: String },

    #[error("Verification of {domain} failed: {reason}")]
    ValidationFailed { domain: String, reason: String },

    #[error("Challenge {kind} not offered for {domain}")]
    UnsupportedChallenge { domain: String, kind: ChallengeKind },

    #[error("Certificate issuance failed: {0}")]
    IssuanceFailed(String),

    #[error("Failed to parse certificate: {0}")]
    CertificateParse(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("ACME protocol error: {0}")]
    ProtocolError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl AcmeError {
    /// The DNS server rejected an update batch.
    pub fn is_transaction(&self) -> bool {
        matches!(self, Self::Dns(e) if e.is_transaction())
    }
}

impl From<instant_acme::Error> for AcmeError {
    fn from(e: instant_acme::Error) -> Self {
        AcmeError::ProtocolError(e.to_string())
    }
}

pub type AcmeResult<T> = Result<T, AcmeError>;
