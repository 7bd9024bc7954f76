use crate::client::OrderHandle;
use crate::types::{AcmeError, AcmeResult, Challenge, ChallengeStatus};
use futures_util::future::try_join_all;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info};

/// Drives published challenges to a final state.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationPoller {
    interval: Duration,
    timeout: Duration,
}

impl AuthorizationPoller {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Ask the server to validate every challenge, then wait until all of
    /// them are valid. One deadline covers every domain; the first failure
    /// drops the remaining polls.
    pub async fn run<O: OrderHandle>(&self, order: &O, challenges: &[Challenge]) -> AcmeResult<()> {
        for challenge in challenges {
            order.request_validation(challenge).await?;
            debug!(domain = %challenge.domain, "Validation requested");
        }

        let deadline = Instant::now() + self.timeout;
        try_join_all(challenges.iter().map(|c| self.poll(order, c, deadline))).await?;
        Ok(())
    }

    async fn poll<O: OrderHandle>(&self, order: &O, challenge: &Challenge, deadline: Instant) -> AcmeResult<()> {
        loop {
            let state = order.challenge_state(challenge).await?;
            match state.status {
                ChallengeStatus::Valid => {
                    info!(domain = %challenge.domain, "Challenge validated");
                    return Ok(());
                }
                ChallengeStatus::Invalid => {
                    return Err(AcmeError::ValidationFailed {
                        domain: challenge.domain.clone(),
                        reason: state.error.unwrap_or_else(|| "challenge is invalid".to_string()),
                    });
                }
                ChallengeStatus::Pending => {}
            }

            if Instant::now() + self.interval > deadline {
                return Err(AcmeError::ValidationTimeout {
                    domain: challenge.domain.clone(),
                });
            }
            debug!(domain = %challenge.domain, "Challenge still pending");
            sleep(self.interval).await;
        }
    }
}
