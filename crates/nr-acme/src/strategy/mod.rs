//! Ways of proving control over the domains of an order.

mod dns01;
mod http01;

pub use dns01::{Dns01, challenge_record_name};
pub use http01::{Http01, challenge_file_path};

use crate::client::OrderHandle;
use crate::poller::AuthorizationPoller;
use crate::types::{
    AcmeConfig, AcmeError, AcmeResult, AuthorizationStatus, Challenge, ChallengeKind,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use nr_dns::{DnsQuerier, PropagationChecker, UpdateExecutor};
use ring::digest::{SHA256, digest};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// What a verification published, keyed by domain.
#[derive(Debug, Clone, Default)]
pub struct Verification {
    pub challenges: BTreeMap<String, Challenge>,
    /// Domains whose authorization did not offer the requested challenge
    pub unsupported: Vec<String>,
}

impl Verification {
    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

pub enum VerificationStrategy<E, Q> {
    Dns01(Dns01<E, Q>),
    Http01(Http01),
}

impl<E: UpdateExecutor, Q: DnsQuerier> VerificationStrategy<E, Q> {
    /// Build the strategy `config.challenge` names. The DNS collaborators
    /// are only kept for DNS-01.
    pub fn from_config(config: &AcmeConfig, executor: E, checker: PropagationChecker<Q>) -> AcmeResult<Self> {
        let poller = AuthorizationPoller::new(config.validation_interval(), config.validation_timeout());
        match config.challenge {
            ChallengeKind::Dns01 => Ok(Self::Dns01(Dns01::new(
                executor,
                checker,
                config.update.clone(),
                config.txt_ttl,
                config.keep,
                poller,
            ))),
            ChallengeKind::Http01 => {
                let webroot = config
                    .webroot
                    .clone()
                    .ok_or_else(|| AcmeError::ConfigError("http-01 needs a webroot".into()))?;
                Ok(Self::Http01(Http01::new(webroot, poller)))
            }
        }
    }

    pub fn kind(&self) -> ChallengeKind {
        match self {
            Self::Dns01(_) => ChallengeKind::Dns01,
            Self::Http01(_) => ChallengeKind::Http01,
        }
    }

    /// Publish responses for every unsolved authorization and wait for the
    /// server to accept them.
    pub async fn verify<O: OrderHandle>(&self, order: &O) -> AcmeResult<Verification> {
        match self {
            Self::Dns01(s) => s.verify(order).await,
            Self::Http01(s) => s.verify(order).await,
        }
    }

    /// Withdraw what [`verify`](Self::verify) published.
    pub async fn cleanup(&self, verification: &Verification) -> AcmeResult<()> {
        match self {
            Self::Dns01(s) => s.cleanup(verification).await,
            Self::Http01(s) => s.cleanup(verification).await,
        }
    }
}

/// TXT value proving a key authorization.
pub fn dns_value(key_authorization: &str) -> String {
    URL_SAFE_NO_PAD.encode(digest(&SHA256, key_authorization.as_bytes()))
}

/// Collect the challenges to solve, skipping authorizations that are
/// already valid or that do not offer `kind`.
pub(crate) async fn pending_challenges<O: OrderHandle>(
    order: &O,
    kind: ChallengeKind,
) -> AcmeResult<Verification> {
    let mut verification = Verification::default();

    for auth in order.authorizations().await? {
        if auth.status == AuthorizationStatus::Valid {
            debug!(domain = %auth.domain, "Authorization already valid");
            continue;
        }
        let Some(offer) = auth.offer(kind) else {
            let err = AcmeError::UnsupportedChallenge {
                domain: auth.domain.clone(),
                kind,
            };
            warn!(domain = %auth.domain, "{}", err);
            verification.unsupported.push(auth.domain);
            continue;
        };
        let content = match kind {
            ChallengeKind::Dns01 => dns_value(&offer.key_authorization),
            ChallengeKind::Http01 => offer.key_authorization.clone(),
        };
        let challenge = Challenge::new(&auth.domain, offer, content);
        verification.challenges.insert(auth.domain, challenge);
    }

    Ok(verification)
}
