use super::{Verification, pending_challenges};
use crate::client::OrderHandle;
use crate::poller::AuthorizationPoller;
use crate::types::{AcmeError, AcmeResult, Challenge, ChallengeKind};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Tokens are base64url (RFC 8555 section 8.3); anything else could leave
/// the challenge directory.
fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub fn challenge_file_path(webroot: &Path, token: &str) -> AcmeResult<PathBuf> {
    if !is_valid_token(token) {
        return Err(AcmeError::ProtocolError(format!("Invalid challenge token {:?}", token)));
    }
    Ok(webroot.join(".well-known").join("acme-challenge").join(token))
}

/// HTTP-01 by dropping the key authorization into a served webroot
pub struct Http01 {
    webroot: PathBuf,
    poller: AuthorizationPoller,
}

impl Http01 {
    pub fn new(webroot: PathBuf, poller: AuthorizationPoller) -> Self {
        Self { webroot, poller }
    }

    pub(super) async fn verify<O: OrderHandle>(&self, order: &O) -> AcmeResult<Verification> {
        let verification = pending_challenges(order, ChallengeKind::Http01).await?;
        if verification.is_empty() {
            return Ok(verification);
        }

        let files = verification
            .challenges
            .values()
            .map(|challenge| challenge_file_path(&self.webroot, &challenge.token).map(|path| (challenge, path)))
            .collect::<AcmeResult<Vec<_>>>()?;

        for (challenge, path) in files {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, challenge.content.as_bytes()).await?;
            info!(domain = %challenge.domain, path = %path.display(), "Wrote challenge file");
        }

        let challenges: Vec<Challenge> = verification.challenges.values().cloned().collect();
        self.poller.run(order, &challenges).await?;
        Ok(verification)
    }

    pub(super) async fn cleanup(&self, verification: &Verification) -> AcmeResult<()> {
        for challenge in verification.challenges.values() {
            let path = challenge_file_path(&self.webroot, &challenge.token)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "Removed challenge file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}
