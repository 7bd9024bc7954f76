//! [`AcmeService`] backed by instant-acme.

use crate::client::{AcmeService, OrderHandle};
use crate::storage::write_private;
use crate::types::{
    AcmeError, AcmeResult, Authorization, AuthorizationStatus, Challenge, ChallengeKind,
    ChallengeOffer, ChallengeState, ChallengeStatus, IssuanceState,
};
use instant_acme::{
    Account, AccountCredentials, ChallengeType, Identifier, NewAccount, NewOrder, Order,
    OrderStatus,
};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// How long one authorizations fetch answers challenge polls. Polls of the
/// same round land well within it.
const SNAPSHOT_TTL: Duration = Duration::from_secs(1);

/// Let's Encrypt (or any RFC 8555 directory) through instant-acme
pub struct InstantAcmeService {
    directory_url: String,
    account: Mutex<Option<Account>>,
}

impl InstantAcmeService {
    pub fn new(directory_url: impl Into<String>) -> Self {
        Self {
            directory_url: directory_url.into(),
            account: Mutex::new(None),
        }
    }

    /// Register a new account and store its credentials
    async fn create_account(&self, path: &Path, contact: &str) -> AcmeResult<Account> {
        info!(directory = %self.directory_url, "Creating new ACME account");

        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[&format!("mailto:{}", contact)],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &self.directory_url,
            None,
        )
        .await
        .map_err(|e| AcmeError::ProtocolError(format!("Failed to create account: {}", e)))?;

        let creds_json = serde_json::to_string_pretty(&credentials)?;
        write_private(path, &creds_json)?;

        info!(contact = %contact, "Created new ACME account");
        Ok(account)
    }

    async fn load_account(&self, path: &Path) -> AcmeResult<Account> {
        debug!(path = %path.display(), "Loading existing ACME account");

        let creds_json = tokio::fs::read_to_string(path).await?;
        let credentials: AccountCredentials = serde_json::from_str(&creds_json)?;

        let account = Account::from_credentials(credentials)
            .await
            .map_err(|e| AcmeError::ProtocolError(format!("Failed to load account: {}", e)))?;

        info!("Loaded existing ACME account");
        Ok(account)
    }
}

impl AcmeService for InstantAcmeService {
    type Order = InstantAcmeOrder;

    async fn ensure_account(&self, credentials_path: &Path, contact: &str) -> AcmeResult<()> {
        let account = if credentials_path.exists() {
            self.load_account(credentials_path).await?
        } else {
            self.create_account(credentials_path, contact).await?
        };
        *self.account.lock().await = Some(account);
        Ok(())
    }

    async fn new_order(&self, domains: &[String]) -> AcmeResult<InstantAcmeOrder> {
        let account_guard = self.account.lock().await;
        let account = account_guard.as_ref().ok_or(AcmeError::NotInitialized)?;

        let identifiers: Vec<Identifier> = domains.iter().cloned().map(Identifier::Dns).collect();
        let order = account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::ProtocolError(format!("Failed to create order: {}", e)))?;

        Ok(InstantAcmeOrder {
            order: Mutex::new(order),
            snapshot: Mutex::new(None),
        })
    }
}

pub struct InstantAcmeOrder {
    order: Mutex<Order>,
    snapshot: Mutex<Option<StateSnapshot>>,
}

/// Challenge states by challenge URL, from one authorizations fetch
struct StateSnapshot {
    taken: Instant,
    states: HashMap<String, ChallengeState>,
}

impl StateSnapshot {
    fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.taken) < SNAPSHOT_TTL
    }
}

/// A challenge is as far along as the authorization holding it.
fn challenge_states(authorizations: &[instant_acme::Authorization]) -> HashMap<String, ChallengeState> {
    let mut states = HashMap::new();
    for auth in authorizations {
        let status = match auth.status {
            instant_acme::AuthorizationStatus::Valid => ChallengeStatus::Valid,
            instant_acme::AuthorizationStatus::Pending => ChallengeStatus::Pending,
            _ => ChallengeStatus::Invalid,
        };
        for challenge in &auth.challenges {
            states.insert(
                challenge.url.clone(),
                ChallengeState {
                    status,
                    error: challenge.error.as_ref().map(|problem| problem.to_string()),
                },
            );
        }
    }
    states
}

fn challenge_kind(challenge_type: &ChallengeType) -> Option<ChallengeKind> {
    match challenge_type {
        ChallengeType::Dns01 => Some(ChallengeKind::Dns01),
        ChallengeType::Http01 => Some(ChallengeKind::Http01),
        _ => None,
    }
}

impl OrderHandle for InstantAcmeOrder {
    async fn authorizations(&self) -> AcmeResult<Vec<Authorization>> {
        let mut order = self.order.lock().await;
        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::ProtocolError(format!("Failed to get authorizations: {}", e)))?;

        Ok(authorizations
            .iter()
            .map(|auth| {
                let domain = match &auth.identifier {
                    Identifier::Dns(d) => d.clone(),
                };
                let status = match auth.status {
                    instant_acme::AuthorizationStatus::Pending => AuthorizationStatus::Pending,
                    instant_acme::AuthorizationStatus::Valid => AuthorizationStatus::Valid,
                    _ => AuthorizationStatus::Invalid,
                };
                let challenges = auth
                    .challenges
                    .iter()
                    .filter_map(|c| {
                        Some(ChallengeOffer {
                            kind: challenge_kind(&c.r#type)?,
                            url: c.url.clone(),
                            token: c.token.clone(),
                            key_authorization: order.key_authorization(c).as_str().to_string(),
                        })
                    })
                    .collect();
                Authorization {
                    domain,
                    status,
                    challenges,
                }
            })
            .collect())
    }

    async fn request_validation(&self, challenge: &Challenge) -> AcmeResult<()> {
        let mut order = self.order.lock().await;
        *self.snapshot.lock().await = None;
        order
            .set_challenge_ready(&challenge.url)
            .await
            .map_err(|e| AcmeError::ProtocolError(format!("Failed to set challenge ready: {}", e)))
    }

    async fn challenge_state(&self, challenge: &Challenge) -> AcmeResult<ChallengeState> {
        let mut order = self.order.lock().await;
        let mut snapshot = self.snapshot.lock().await;

        let now = Instant::now();
        let current = match snapshot.take() {
            Some(taken) if taken.is_fresh(now) => taken,
            _ => {
                let authorizations = order.authorizations().await.map_err(|e| {
                    AcmeError::ProtocolError(format!("Failed to refresh authorizations: {}", e))
                })?;
                StateSnapshot {
                    taken: now,
                    states: challenge_states(&authorizations),
                }
            }
        };

        let state = current.states.get(&challenge.url).cloned();
        *snapshot = Some(current);
        state.ok_or_else(|| AcmeError::ProtocolError(format!("Challenge for {} disappeared", challenge.domain)))
    }

    async fn finalize(&self, csr_der: &[u8]) -> AcmeResult<()> {
        self.order
            .lock()
            .await
            .finalize(csr_der)
            .await
            .map_err(|e| AcmeError::ProtocolError(format!("Failed to finalize order: {}", e)))
    }

    async fn poll_issuance(&self) -> AcmeResult<IssuanceState> {
        let mut order = self.order.lock().await;
        let status = order
            .refresh()
            .await
            .map_err(|e| AcmeError::ProtocolError(format!("Failed to refresh order: {}", e)))?
            .status;

        match status {
            OrderStatus::Processing => Ok(IssuanceState::Processing),
            OrderStatus::Valid => match order.certificate().await? {
                Some(chain) => Ok(IssuanceState::Valid(chain)),
                None => Ok(IssuanceState::Processing),
            },
            other => Ok(IssuanceState::Failed(format!("order is {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn authorization(domain: &str, status: &str, error: Option<&str>) -> instant_acme::Authorization {
        let mut challenge = json!({
            "type": "dns-01",
            "url": format!("https://acme.test/chall/{}", domain),
            "token": "tok",
            "status": status,
        });
        if let Some(detail) = error {
            challenge["error"] = json!({
                "type": "urn:ietf:params:acme:error:unauthorized",
                "detail": detail,
                "status": 403,
            });
        }
        serde_json::from_value(json!({
            "identifier": { "type": "dns", "value": domain },
            "status": status,
            "challenges": [challenge],
        }))
        .unwrap()
    }

    #[test]
    fn test_states_follow_authorization() {
        let states = challenge_states(&[
            authorization("a.example.com", "valid", None),
            authorization("b.example.com", "pending", None),
            authorization("c.example.com", "invalid", Some("Incorrect TXT record found")),
        ]);

        assert_eq!(states["https://acme.test/chall/a.example.com"].status, ChallengeStatus::Valid);
        assert_eq!(states["https://acme.test/chall/b.example.com"].status, ChallengeStatus::Pending);
        let failed = &states["https://acme.test/chall/c.example.com"];
        assert_eq!(failed.status, ChallengeStatus::Invalid);
        assert!(failed.error.as_deref().unwrap().contains("Incorrect TXT record found"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_covers_one_round() {
        let snapshot = StateSnapshot {
            taken: Instant::now(),
            states: HashMap::new(),
        };
        tokio::time::advance(Duration::from_millis(200)).await;
        assert!(snapshot.is_fresh(Instant::now()));

        // next poll round, 5s later
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!snapshot.is_fresh(Instant::now()));
    }
}
