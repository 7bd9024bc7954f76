//! One renewal run: decide, obtain, persist, clean up, rotate.

use crate::certificate::CertificateRecord;
use crate::client::{AcmeService, OrderHandle};
use crate::storage::CertStorage;
use crate::strategy::{Verification, VerificationStrategy};
use crate::tlsa::{RotationReport, TrustRecordRotator};
use crate::types::{AcmeConfig, AcmeError, AcmeResult, IssuanceState};
use chrono::{DateTime, Utc};
use nr_dns::{DnsQuerier, UpdateExecutor};
use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info, warn};

const ARCHIVE_STAMP: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalReason {
    Forced,
    Missing,
    Unreadable,
    Expiring { expires_at: DateTime<Utc> },
}

impl fmt::Display for RenewalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forced => f.write_str("renewal forced"),
            Self::Missing => f.write_str("no live certificate"),
            Self::Unreadable => f.write_str("live certificate unreadable"),
            Self::Expiring { expires_at } => write!(f, "expires {}", expires_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalDecision {
    Skip { expires_at: DateTime<Utc> },
    Renew(RenewalReason),
}

#[derive(Debug, Clone)]
pub enum RenewalOutcome {
    Skipped {
        expires_at: DateTime<Utc>,
    },
    Renewed {
        expires_at: DateTime<Utc>,
        archive: PathBuf,
        verification: Verification,
        /// `None` when TLSA publishing is disabled
        rotation: Option<RotationReport>,
    },
}

pub struct RenewalController<S, E, Q> {
    config: AcmeConfig,
    service: S,
    strategy: VerificationStrategy<E, Q>,
    executor: E,
    storage: CertStorage,
    rotator: TrustRecordRotator,
}

impl<S, E, Q> RenewalController<S, E, Q>
where
    S: AcmeService,
    E: UpdateExecutor,
    Q: DnsQuerier,
{
    /// `executor` carries the TLSA updates; DNS-01 challenges go through
    /// the strategy's own.
    pub fn new(config: AcmeConfig, service: S, strategy: VerificationStrategy<E, Q>, executor: E) -> Self {
        let storage = CertStorage::new(&config.data_dir);
        let rotator = TrustRecordRotator::new(
            config.update.clone(),
            config.tlsa_ports.clone(),
            config.tlsa_ttl,
            config.keep,
        );
        Self {
            config,
            service,
            strategy,
            executor,
            storage,
            rotator,
        }
    }

    pub fn storage(&self) -> &CertStorage {
        &self.storage
    }

    /// Look at the live certificate only; never touches the network.
    pub fn decide(&self, now: DateTime<Utc>) -> AcmeResult<RenewalDecision> {
        if self.config.force {
            return Ok(RenewalDecision::Renew(RenewalReason::Forced));
        }

        let primary = self.config.primary_domain()?;
        let Some(pem) = self.storage.read_live_chain(primary)? else {
            return Ok(RenewalDecision::Renew(RenewalReason::Missing));
        };

        let record = match CertificateRecord::from_pem(&pem) {
            Ok(record) => record,
            Err(e) => {
                warn!(domain = %primary, error = %e, "Live certificate cannot be parsed");
                return Ok(RenewalDecision::Renew(RenewalReason::Unreadable));
            }
        };

        let threshold = chrono::Duration::days(i64::from(self.config.renewal_threshold_days));
        if record.not_after - now <= threshold {
            Ok(RenewalDecision::Renew(RenewalReason::Expiring {
                expires_at: record.not_after,
            }))
        } else {
            Ok(RenewalDecision::Skip {
                expires_at: record.not_after,
            })
        }
    }

    pub async fn run(&self) -> AcmeResult<RenewalOutcome> {
        let primary = self.config.primary_domain()?;
        match self.decide(Utc::now())? {
            RenewalDecision::Skip { expires_at } => {
                info!(domain = %primary, expires = %expires_at, "Certificate still valid, nothing to do");
                Ok(RenewalOutcome::Skipped { expires_at })
            }
            RenewalDecision::Renew(reason) => {
                info!(domain = %primary, reason = %reason, "Renewing certificate");
                self.renew().await
            }
        }
    }

    /// Obtain and install a new certificate unconditionally.
    pub async fn renew(&self) -> AcmeResult<RenewalOutcome> {
        let primary = self.config.primary_domain()?;
        let contact = &self.config.contact;

        self.service
            .ensure_account(&self.storage.account_path(contact), contact)
            .await?;

        let order = self.service.new_order(&self.config.domains).await?;
        info!(domains = ?self.config.domains, challenge = %self.strategy.kind(), "Order created");

        let verification = self.strategy.verify(&order).await?;
        if !verification.unsupported.is_empty() {
            warn!(domains = ?verification.unsupported, "Some domains could not be verified");
        }

        info!("Generating CSR and finalizing order...");
        let mut params = CertificateParams::new(self.config.domains.clone())
            .map_err(|e| AcmeError::ProtocolError(format!("Failed to create cert params: {}", e)))?;
        params.distinguished_name = DistinguishedName::new();
        params.distinguished_name.push(DnType::CommonName, primary);

        let key_pair = KeyPair::generate()
            .map_err(|e| AcmeError::ProtocolError(format!("Failed to generate key pair: {}", e)))?;
        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| AcmeError::ProtocolError(format!("Failed to create CSR: {}", e)))?;

        order.finalize(csr.der()).await?;
        let chain = self.await_certificate(&order).await?;
        let record = CertificateRecord::from_pem(&chain)?;

        let key_pem = key_pair.serialize_pem();
        self.storage.write_live(primary, &chain, &key_pem)?;
        let stamp = Utc::now().format(ARCHIVE_STAMP).to_string();
        let archive = self.storage.write_archive(&stamp, primary, &chain, &key_pem)?;
        info!(
            domain = %primary,
            expires = %record.not_after,
            archive = %archive.display(),
            "Certificate installed"
        );

        // The new key is live now; TLSA records follow it even if cleanup fails.
        let cleanup = if self.config.keep {
            debug!("Keeping challenge responses");
            Ok(())
        } else {
            self.strategy.cleanup(&verification).await
        };

        let rotation = if self.config.publish_tlsa {
            let report = self
                .rotator
                .rotate(&self.executor, &self.storage, &self.config.domains, &record)
                .await?;
            if !report.is_success() {
                warn!(failed = report.failed.len(), "Some TLSA updates failed");
            }
            Some(report)
        } else {
            None
        };
        cleanup?;

        Ok(RenewalOutcome::Renewed {
            expires_at: record.not_after,
            archive,
            verification,
            rotation,
        })
    }

    async fn await_certificate<O: OrderHandle>(&self, order: &O) -> AcmeResult<String> {
        loop {
            match order.poll_issuance().await? {
                IssuanceState::Valid(chain) => return Ok(chain),
                IssuanceState::Processing => {
                    debug!("Certificate not ready yet");
                    tokio::time::sleep(self.config.issuance_interval()).await;
                }
                IssuanceState::Failed(reason) => return Err(AcmeError::IssuanceFailed(reason)),
            }
        }
    }
}
