#![allow(dead_code)]

use nr_acme::strategy::dns_value;
use nr_acme::types::{
    AcmeResult, Authorization, AuthorizationStatus, Challenge, ChallengeKind, ChallengeOffer,
    ChallengeState, ChallengeStatus, IssuanceState,
};
use nr_acme::{AcmeService, OrderHandle};
use nr_dns::packet::{DnsHeader, ParsedResponse};
use nr_dns::records::DnsRecord;
use nr_dns::{DnsQuerier, DnsResult, RecordType, UpdateExecutor, UpdateOutput};
use rcgen::{CertificateParams, KeyPair};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

pub const PRIMARY_NS: &str = "192.0.2.53";

/// Self-signed chain for `domains` valid for `days` more days.
pub fn chain_for(domains: &[&str], key: &KeyPair, days: i64) -> String {
    let names: Vec<String> = domains.iter().map(|d| d.to_string()).collect();
    let mut params = CertificateParams::new(names).unwrap();
    params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(days);
    params.self_signed(key).unwrap().pem()
}

pub fn key_authorization(domain: &str) -> String {
    format!("{}.thumbprint", token(domain))
}

pub fn token(domain: &str) -> String {
    format!("token-{}", domain.trim_start_matches("*."))
}

/// Records every script and rejects those containing `reject`.
#[derive(Default)]
pub struct RecordingExecutor {
    pub scripts: Mutex<Vec<String>>,
    pub reject: Option<&'static str>,
}

impl RecordingExecutor {
    pub fn rejecting(pattern: &'static str) -> Self {
        Self {
            scripts: Mutex::new(Vec::new()),
            reject: Some(pattern),
        }
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }
}

impl UpdateExecutor for RecordingExecutor {
    async fn execute(&self, script: &str) -> DnsResult<UpdateOutput> {
        self.scripts.lock().unwrap().push(script.to_string());
        let rejected = self.reject.is_some_and(|pattern| script.contains(pattern));
        Ok(UpdateOutput {
            output: if rejected {
                "> update failed: REFUSED\n".to_string()
            } else {
                String::new()
            },
            success: !rejected,
        })
    }
}

fn response(answers: Vec<DnsRecord>, additional: Vec<DnsRecord>) -> ParsedResponse {
    ParsedResponse {
        header: DnsHeader {
            id: 0,
            flags: 0x8400,
            qd_count: 1,
            an_count: answers.len() as u16,
            ns_count: 0,
            ar_count: additional.len() as u16,
        },
        answers,
        authority: Vec::new(),
        additional,
    }
}

/// `example.com` served by two glued nameservers that start answering with
/// the published TXT values after `visible_after`.
pub struct FakeZone {
    started: Instant,
    visible_after: Duration,
    values: HashMap<String, Vec<String>>,
    pub txt_queries: Arc<Mutex<usize>>,
}

impl FakeZone {
    pub fn new(visible_after: Duration) -> Self {
        Self {
            started: Instant::now(),
            visible_after,
            values: HashMap::new(),
            txt_queries: Arc::new(Mutex::new(0)),
        }
    }

    /// Serve the DNS-01 value for `domain` once visible.
    pub fn with_challenge(mut self, domain: &str) -> Self {
        let record = format!("_acme-challenge.{}", domain.trim_start_matches("*."));
        self.values
            .entry(record)
            .or_default()
            .push(dns_value(&key_authorization(domain)));
        self
    }
}

impl DnsQuerier for FakeZone {
    async fn query(
        &self,
        _server: SocketAddr,
        name: &str,
        qtype: RecordType,
        _recursion_desired: bool,
    ) -> DnsResult<ParsedResponse> {
        match qtype {
            RecordType::SOA => Ok(response(
                vec![DnsRecord::soa("example.com", "ns1.example.com", "hostmaster.example.com", 300)],
                vec![],
            )),
            RecordType::NS => Ok(response(
                vec![
                    DnsRecord::ns("example.com", "ns1.example.com", 300),
                    DnsRecord::ns("example.com", "ns2.example.com", 300),
                ],
                vec![
                    DnsRecord::a("ns1.example.com", Ipv4Addr::new(192, 0, 2, 1), 300),
                    DnsRecord::a("ns2.example.com", Ipv4Addr::new(192, 0, 2, 2), 300),
                ],
            )),
            RecordType::TXT => {
                *self.txt_queries.lock().unwrap() += 1;
                let answers = match self.values.get(name) {
                    Some(values) if self.started.elapsed() >= self.visible_after => {
                        values.iter().map(|v| DnsRecord::txt(name, v, 60)).collect()
                    }
                    _ => Vec::new(),
                };
                Ok(response(answers, vec![]))
            }
            other => panic!("unexpected query type {other}"),
        }
    }

    async fn resolve_host(&self, host: &str) -> DnsResult<Vec<IpAddr>> {
        panic!("unexpected resolution of {host}")
    }
}

/// What an order looks like on the mock server
#[derive(Clone)]
pub struct OrderScript {
    /// (domain, status) per authorization; every one offers both challenges
    pub authorizations: Vec<(String, AuthorizationStatus)>,
    /// Status polls before a challenge turns valid
    pub polls_until_valid: usize,
    /// Domains whose challenge turns invalid instead
    pub invalid: HashSet<String>,
    /// `processing` answers before the certificate is handed out
    pub processing_rounds: usize,
    pub chain: String,
    pub fail_issuance: bool,
    /// Token per domain instead of the default `token-<domain>`
    pub tokens: HashMap<String, String>,
    /// Challenge kinds per domain instead of both
    pub offered: HashMap<String, Vec<ChallengeKind>>,
}

impl OrderScript {
    pub fn pending(domains: &[&str], chain: String) -> Self {
        Self {
            authorizations: domains
                .iter()
                .map(|d| (d.to_string(), AuthorizationStatus::Pending))
                .collect(),
            polls_until_valid: 1,
            invalid: HashSet::new(),
            processing_rounds: 0,
            chain,
            fail_issuance: false,
            tokens: HashMap::new(),
            offered: HashMap::new(),
        }
    }
}

/// ACME server double; every call is appended to `log`.
#[derive(Clone)]
pub struct MockAcme {
    pub script: OrderScript,
    pub log: Arc<Mutex<Vec<String>>>,
}

impl MockAcme {
    pub fn new(script: OrderScript) -> Self {
        Self {
            script,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn order(&self) -> MockOrder {
        MockOrder {
            script: self.script.clone(),
            log: self.log.clone(),
            polls: Mutex::new(HashMap::new()),
            issuance_polls: Mutex::new(0),
        }
    }
}

impl AcmeService for MockAcme {
    type Order = MockOrder;

    async fn ensure_account(&self, credentials_path: &Path, contact: &str) -> AcmeResult<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("account {} {}", contact, credentials_path.display()));
        Ok(())
    }

    async fn new_order(&self, domains: &[String]) -> AcmeResult<MockOrder> {
        self.log.lock().unwrap().push(format!("order {}", domains.join(",")));
        Ok(self.order())
    }
}

pub struct MockOrder {
    script: OrderScript,
    log: Arc<Mutex<Vec<String>>>,
    polls: Mutex<HashMap<String, usize>>,
    issuance_polls: Mutex<usize>,
}

impl OrderHandle for MockOrder {
    async fn authorizations(&self) -> AcmeResult<Vec<Authorization>> {
        self.log.lock().unwrap().push("authorizations".to_string());
        Ok(self
            .script
            .authorizations
            .iter()
            .map(|(domain, status)| {
                let token = self.script.tokens.get(domain).cloned().unwrap_or_else(|| token(domain));
                let kinds = self
                    .script
                    .offered
                    .get(domain)
                    .cloned()
                    .unwrap_or_else(|| ChallengeKind::ALL.to_vec());
                Authorization {
                    domain: domain.clone(),
                    status: *status,
                    challenges: kinds
                        .into_iter()
                        .map(|kind| ChallengeOffer {
                            kind,
                            url: format!("https://acme.test/chall/{}/{}", kind, domain),
                            token: token.clone(),
                            key_authorization: format!("{}.thumbprint", token),
                        })
                        .collect(),
                }
            })
            .collect())
    }

    async fn request_validation(&self, challenge: &Challenge) -> AcmeResult<()> {
        self.log.lock().unwrap().push(format!("ready {}", challenge.domain));
        Ok(())
    }

    async fn challenge_state(&self, challenge: &Challenge) -> AcmeResult<ChallengeState> {
        let mut polls = self.polls.lock().unwrap();
        let count = polls.entry(challenge.domain.clone()).or_default();
        *count += 1;

        if self.script.invalid.contains(&challenge.domain) {
            return Ok(ChallengeState {
                status: ChallengeStatus::Invalid,
                error: Some("Incorrect TXT record found".to_string()),
            });
        }
        let status = if *count >= self.script.polls_until_valid {
            ChallengeStatus::Valid
        } else {
            ChallengeStatus::Pending
        };
        Ok(ChallengeState { status, error: None })
    }

    async fn finalize(&self, csr_der: &[u8]) -> AcmeResult<()> {
        assert!(!csr_der.is_empty());
        self.log.lock().unwrap().push("finalize".to_string());
        Ok(())
    }

    async fn poll_issuance(&self) -> AcmeResult<IssuanceState> {
        let mut polls = self.issuance_polls.lock().unwrap();
        *polls += 1;
        if self.script.fail_issuance {
            return Ok(IssuanceState::Failed("order is Invalid".to_string()));
        }
        if *polls <= self.script.processing_rounds {
            Ok(IssuanceState::Processing)
        } else {
            Ok(IssuanceState::Valid(self.script.chain.clone()))
        }
    }
}
