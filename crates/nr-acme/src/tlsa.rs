//! TLSA (DANE) records for the issued key.
//!
//! Clients may have cached the records of the previous certificate, so the
//! contents of the two newest archived versions stay published; anything
//! older is withdrawn once a new version is live.

use crate::certificate::{CertificateRecord, TlsaContent};
use crate::storage::CertStorage;
use crate::types::{AcmeError, AcmeResult};
use nr_dns::records::same_name;
use nr_dns::{DnsTransaction, DnsUpdateConfig, RecordType, UpdateExecutor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, info, warn};

/// Archived versions whose content is never withdrawn.
const RETAINED_VERSIONS: usize = 2;

/// Port a TLSA record is published for: `443` on every domain, or
/// `admin+mail:8443` on the named hosts only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PortSpec {
    All(u16),
    Hosts { names: Vec<String>, port: u16 },
}

impl PortSpec {
    pub fn port(&self) -> u16 {
        match self {
            Self::All(port) | Self::Hosts { port, .. } => *port,
        }
    }

    /// A host name matches `domain` on its own or as a label under `primary`.
    pub fn applies_to(&self, domain: &str, primary: &str) -> bool {
        match self {
            Self::All(_) => true,
            Self::Hosts { names, .. } => names
                .iter()
                .any(|name| same_name(domain, name) || same_name(domain, &format!("{}.{}", name, primary))),
        }
    }
}

impl FromStr for PortSpec {
    type Err = AcmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AcmeError::ConfigError(format!("Invalid TLSA port spec: {}", s));
        let s = s.trim();

        match s.rsplit_once(':') {
            None => s.parse().map(Self::All).map_err(|_| invalid()),
            Some((names, port)) => {
                let port = port.parse().map_err(|_| invalid())?;
                let names: Vec<String> = names.split('+').map(|n| n.trim().to_string()).collect();
                if names.iter().any(String::is_empty) {
                    return Err(invalid());
                }
                Ok(Self::Hosts { names, port })
            }
        }
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All(port) => write!(f, "{}", port),
            Self::Hosts { names, port } => write!(f, "{}:{}", names.join("+"), port),
        }
    }
}

impl TryFrom<String> for PortSpec {
    type Error = AcmeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PortSpec> for String {
    fn from(spec: PortSpec) -> Self {
        spec.to_string()
    }
}

pub fn tlsa_record_name(port: u16, domain: &str) -> String {
    format!("_{}._tcp.{}", port, domain)
}

/// Contents still in use versus contents to withdraw
#[derive(Debug, Clone, Default)]
pub struct TlsaHistory {
    /// One entry per retained version, newest last
    pub retained: Vec<TlsaContent>,
    pub stale: BTreeSet<TlsaContent>,
}

impl TlsaHistory {
    pub fn load(storage: &CertStorage, primary: &str) -> AcmeResult<Self> {
        let mut contents = Vec::new();
        for version in storage.archived_versions(primary)? {
            let pem = std::fs::read_to_string(&version.chain_path)?;
            match CertificateRecord::from_pem(&pem) {
                Ok(record) => contents.push(record.tlsa),
                Err(e) => warn!(stamp = %version.stamp, error = %e, "Skipping unreadable archived certificate"),
            }
        }

        let split = contents.len().saturating_sub(RETAINED_VERSIONS);
        let retained = contents.split_off(split);
        let stale = contents
            .into_iter()
            .filter(|content| !retained.contains(content))
            .collect();
        Ok(Self { retained, stale })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub updated: Vec<String>,
    /// Domain and the reason its update failed
    pub failed: Vec<(String, String)>,
}

impl RotationReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct TrustRecordRotator {
    update: DnsUpdateConfig,
    ports: Vec<PortSpec>,
    ttl: u32,
    keep: bool,
}

impl TrustRecordRotator {
    pub fn new(update: DnsUpdateConfig, ports: Vec<PortSpec>, ttl: u32, keep: bool) -> Self {
        Self { update, ports, ttl, keep }
    }

    /// Labels `_<port>._tcp.<domain>` that apply to `domain`.
    pub fn labels(&self, domain: &str, primary: &str) -> Vec<String> {
        let mut labels = Vec::new();
        for spec in self.ports.iter().filter(|spec| spec.applies_to(domain, primary)) {
            let label = tlsa_record_name(spec.port(), domain);
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        labels
    }

    /// Build the update batch for one domain.
    pub fn transaction(&self, labels: &[String], current: &TlsaContent, stale: &BTreeSet<TlsaContent>) -> DnsTransaction {
        let mut tx = DnsTransaction::from_config(&self.update);
        let current_data = current.to_string();
        for label in labels {
            if !self.keep {
                for content in stale.iter().filter(|c| *c != current) {
                    tx.delete(label, Some(RecordType::TLSA), Some(&content.to_string()));
                }
            }
            tx.delete(label, Some(RecordType::TLSA), Some(&current_data));
            tx.add(label, RecordType::TLSA, &current_data, self.ttl);
        }
        tx
    }

    /// Publish `current` for every domain. DNS failures are collected in the
    /// report; only reading the archive can fail the call.
    pub async fn rotate<E: UpdateExecutor>(
        &self,
        executor: &E,
        storage: &CertStorage,
        domains: &[String],
        current: &CertificateRecord,
    ) -> AcmeResult<RotationReport> {
        let primary = domains
            .first()
            .ok_or_else(|| AcmeError::ConfigError("No domain configured".into()))?;
        let history = TlsaHistory::load(storage, primary)?;
        debug!(
            retained = history.retained.len(),
            stale = history.stale.len(),
            "Loaded TLSA history"
        );

        let mut report = RotationReport::default();
        for domain in domains {
            if domain.starts_with("*.") {
                debug!(domain = %domain, "No TLSA record for wildcard name");
                continue;
            }
            let labels = self.labels(domain, primary);
            if labels.is_empty() {
                continue;
            }

            let tx = self.transaction(&labels, &current.tlsa, &history.stale);
            match tx.commit(executor).await {
                Ok(()) => {
                    info!(domain = %domain, labels = labels.len(), "TLSA records updated");
                    report.updated.push(domain.clone());
                }
                Err(e) => {
                    error!(domain = %domain, error = %e, "TLSA update failed");
                    report.failed.push((domain.clone(), e.to_string()));
                }
            }
        }
        Ok(report)
    }
}
