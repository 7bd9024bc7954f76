//! The ACME server as this crate sees it: an account, orders, and the
//! authorizations/challenges hanging off an order.

use std::path::Path;

use crate::types::{AcmeResult, Authorization, Challenge, ChallengeState, IssuanceState};

#[allow(async_fn_in_trait)]
pub trait AcmeService {
    type Order: OrderHandle;

    /// Load the account stored at `credentials_path`, registering a new one
    /// (and writing it there) when the file does not exist.
    async fn ensure_account(&self, credentials_path: &Path, contact: &str) -> AcmeResult<()>;

    async fn new_order(&self, domains: &[String]) -> AcmeResult<Self::Order>;
}

/// One certificate order. Methods take `&self` so that several challenges
/// can be polled at once.
#[allow(async_fn_in_trait)]
pub trait OrderHandle {
    /// Fetch the current authorizations, one per domain.
    async fn authorizations(&self) -> AcmeResult<Vec<Authorization>>;

    /// Tell the server the challenge response is in place.
    async fn request_validation(&self, challenge: &Challenge) -> AcmeResult<()>;

    async fn challenge_state(&self, challenge: &Challenge) -> AcmeResult<ChallengeState>;

    /// Submit the DER-encoded CSR.
    async fn finalize(&self, csr_der: &[u8]) -> AcmeResult<()>;

    /// Re-read the order after finalization.
    async fn poll_issuance(&self) -> AcmeResult<IssuanceState>;
}
