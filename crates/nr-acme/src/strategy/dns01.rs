use super::{Verification, pending_challenges};
use crate::client::OrderHandle;
use crate::poller::AuthorizationPoller;
use crate::types::{AcmeResult, Challenge, ChallengeKind};
use futures_util::future::try_join_all;
use nr_dns::{DnsQuerier, DnsTransaction, DnsUpdateConfig, PropagationChecker, RecordType, UpdateExecutor};
use std::collections::BTreeMap;
use tracing::{error, info};

/// `_acme-challenge` name for a domain; wildcards share their base name's record.
pub fn challenge_record_name(domain: &str) -> String {
    let base = domain.strip_prefix("*.").unwrap_or(domain);
    format!("_acme-challenge.{}", base)
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value)
}

/// DNS-01 through dynamic updates on the primary nameserver
pub struct Dns01<E, Q> {
    executor: E,
    checker: PropagationChecker<Q>,
    update: DnsUpdateConfig,
    txt_ttl: u32,
    keep: bool,
    poller: AuthorizationPoller,
}

impl<E: UpdateExecutor, Q: DnsQuerier> Dns01<E, Q> {
    pub fn new(
        executor: E,
        checker: PropagationChecker<Q>,
        update: DnsUpdateConfig,
        txt_ttl: u32,
        keep: bool,
        poller: AuthorizationPoller,
    ) -> Self {
        Self {
            executor,
            checker,
            update,
            txt_ttl,
            keep,
            poller,
        }
    }

    pub(super) async fn verify<O: OrderHandle>(&self, order: &O) -> AcmeResult<Verification> {
        let verification = pending_challenges(order, ChallengeKind::Dns01).await?;
        if verification.is_empty() {
            return Ok(verification);
        }

        // A wildcard and its base domain publish under the same name
        let records = by_record_name(&verification);
        for (record, challenges) in &records {
            let mut tx = DnsTransaction::from_config(&self.update);
            if !self.keep {
                tx.delete(record, Some(RecordType::TXT), None);
            }
            for challenge in challenges {
                tx.add(record, RecordType::TXT, &quoted(&challenge.content), self.txt_ttl);
            }
            tx.commit(&self.executor).await?;
            info!(record = %record, values = challenges.len(), "Published challenge");
        }

        try_join_all(verification.challenges.values().map(|challenge| {
            let domain = challenge.domain.strip_prefix("*.").unwrap_or(&challenge.domain);
            let record = challenge_record_name(&challenge.domain);
            async move { self.checker.wait_for_txt(domain, &record, &challenge.content).await }
        }))
        .await?;

        let challenges: Vec<Challenge> = verification.challenges.values().cloned().collect();
        self.poller.run(order, &challenges).await?;
        Ok(verification)
    }

    /// Remove every published value. All records are attempted; the first
    /// failure is returned afterwards.
    pub(super) async fn cleanup(&self, verification: &Verification) -> AcmeResult<()> {
        let mut first_error = None;

        for (record, challenges) in by_record_name(verification) {
            let mut tx = DnsTransaction::from_config(&self.update);
            for challenge in &challenges {
                tx.delete(&record, Some(RecordType::TXT), Some(&quoted(&challenge.content)));
            }
            match tx.commit(&self.executor).await {
                Ok(()) => info!(record = %record, "Removed challenge"),
                Err(e) => {
                    error!(record = %record, error = %e, "Failed to remove challenge");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

fn by_record_name(verification: &Verification) -> BTreeMap<String, Vec<&Challenge>> {
    let mut records: BTreeMap<String, Vec<&Challenge>> = BTreeMap::new();
    for challenge in verification.challenges.values() {
        records
            .entry(challenge_record_name(&challenge.domain))
            .or_default()
            .push(challenge);
    }
    records
}
