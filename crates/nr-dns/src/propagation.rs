//! Propagation checks against a zone's authoritative nameservers.
//!
//! The zone is discovered from the primary (SOA, then NS), after which every
//! authoritative server is asked directly until it serves the expected TXT
//! value. All servers share one deadline.

use std::net::{IpAddr, SocketAddr};

use futures_util::future::join_all;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::PropagationConfig;
use crate::error::{DnsError, DnsResult};
use crate::query::{parse_server_addr, DnsQuerier};
use crate::records::{same_name, DnsRecord, RData, RecordType};

/// An authoritative server for the zone under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nameserver {
    pub name: String,
    pub addr: SocketAddr,
}

pub struct PropagationChecker<Q> {
    querier: Q,
    config: PropagationConfig,
    primary: Option<String>,
}

impl<Q: DnsQuerier> PropagationChecker<Q> {
    /// `primary` is the server updates are sent to; zone discovery falls back
    /// to the configured resolver without it.
    pub fn new(querier: Q, config: PropagationConfig, primary: Option<String>) -> Self {
        Self {
            querier,
            config,
            primary,
        }
    }

    async fn server_addr(&self, host: &str) -> DnsResult<SocketAddr> {
        if let Some(addr) = parse_server_addr(host) {
            return Ok(addr);
        }
        let ips = self.querier.resolve_host(host).await?;
        ips.first()
            .map(|ip| SocketAddr::new(*ip, 53))
            .ok_or_else(|| DnsError::Resolve {
                host: host.to_string(),
                reason: "no addresses".to_string(),
            })
    }

    /// Zone apex containing `domain`, plus the server that told us.
    pub async fn zone_apex(&self, domain: &str) -> DnsResult<(SocketAddr, String)> {
        let primary = self.primary.as_deref().unwrap_or(&self.config.resolver);
        let server = self.server_addr(primary).await?;
        let response = self.querier.query(server, domain, RecordType::SOA, true).await?;

        let owner = |records: &[DnsRecord], rtype: RecordType| {
            records
                .iter()
                .find(|r| r.rtype == rtype)
                .map(|r| r.name.trim_end_matches('.').to_lowercase())
        };

        // Direct answer at the apex, else the authority section names the zone
        // (SOA for a name inside it, NS for a referral)
        let apex = owner(&response.answers, RecordType::SOA)
            .or_else(|| owner(&response.authority, RecordType::SOA))
            .or_else(|| owner(&response.authority, RecordType::NS))
            .ok_or_else(|| DnsError::NoNameservers(domain.to_string()))?;

        debug!(domain, apex = %apex, server = %server, "Discovered zone apex");
        Ok((server, apex))
    }

    /// Every nameserver listed in the zone's NS set, with an address each.
    pub async fn authoritative_servers(&self, domain: &str) -> DnsResult<Vec<Nameserver>> {
        let (server, apex) = self.zone_apex(domain).await?;
        let response = self.querier.query(server, &apex, RecordType::NS, true).await?;

        let ns_names = |records: &[DnsRecord]| -> Vec<String> {
            records
                .iter()
                .filter(|r| same_name(&r.name, &apex))
                .filter_map(|r| match &r.rdata {
                    RData::NS(target) => Some(target.trim_end_matches('.').to_lowercase()),
                    _ => None,
                })
                .collect()
        };

        let mut names = ns_names(&response.answers);
        if names.is_empty() {
            names = ns_names(&response.authority);
        }
        names.sort();
        names.dedup();
        if names.is_empty() {
            return Err(DnsError::NoNameservers(apex));
        }

        let mut servers = Vec::with_capacity(names.len());
        for name in names {
            let glue = response.additional.iter().find_map(|r| match r.rdata {
                RData::A(ip) if same_name(&r.name, &name) => Some(IpAddr::V4(ip)),
                RData::AAAA(ip) if same_name(&r.name, &name) => Some(IpAddr::V6(ip)),
                _ => None,
            });
            let addr = match glue {
                Some(ip) => SocketAddr::new(ip, 53),
                None => self.server_addr(&name).await?,
            };
            servers.push(Nameserver { name, addr });
        }

        Ok(servers)
    }

    /// Wait until every authoritative server for `domain` serves `expected`
    /// as a TXT value of `record_name`.
    pub async fn wait_for_txt(&self, domain: &str, record_name: &str, expected: &str) -> DnsResult<()> {
        let servers = self.authoritative_servers(domain).await?;
        let start = Instant::now();
        let deadline = start + self.config.timeout();

        info!(
            record = %record_name,
            nameservers = servers.len(),
            timeout_secs = self.config.timeout_secs,
            "Waiting for DNS propagation"
        );

        let converged = join_all(
            servers
                .iter()
                .map(|ns| self.poll_nameserver(ns, record_name, expected, deadline)),
        )
        .await;

        let stalled: Vec<String> = servers
            .iter()
            .zip(converged)
            .filter(|(_, seen)| !seen)
            .map(|(ns, _)| ns.name.clone())
            .collect();

        if stalled.is_empty() {
            info!(record = %record_name, elapsed_secs = start.elapsed().as_secs(), "DNS propagation confirmed");
            return Ok(());
        }

        Err(DnsError::PropagationTimeout {
            record: record_name.to_string(),
            servers: stalled,
            elapsed: start.elapsed(),
        })
    }

    async fn poll_nameserver(&self, ns: &Nameserver, record_name: &str, expected: &str, deadline: Instant) -> bool {
        loop {
            match self.querier.query(ns.addr, record_name, RecordType::TXT, false).await {
                Ok(response) if response.txt_values(record_name).any(|v| v == expected) => {
                    debug!(nameserver = %ns.name, record = %record_name, "Record visible");
                    return true;
                }
                Ok(_) => {
                    debug!(nameserver = %ns.name, record = %record_name, "Record not yet visible");
                }
                Err(e) => {
                    warn!(nameserver = %ns.name, record = %record_name, error = %e, "DNS lookup error");
                }
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(nameserver = %ns.name, record = %record_name, "Gave up waiting for record");
                return false;
            }
            sleep(self.config.check_interval().min(deadline - now)).await;
        }
    }
}
