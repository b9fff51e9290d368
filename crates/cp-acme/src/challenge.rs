//! DNS-01 challenge seam between the ACME client and a DNS provider.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Prefix of the TXT record checked by the CA
pub const ACME_CHALLENGE_PREFIX: &str = "_acme-challenge.";

/// How long the CA client waits for a presented challenge to validate
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);
/// Delay between two order status polls
pub const VALIDATION_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("Could not resolve the zone for {fqdn}: {reason}")]
    ZoneResolution { fqdn: String, reason: String },

    #[error("No challenge session for {0}")]
    SessionNotFound(String),

    #[error("DNS provider error: {0}")]
    Provider(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Creates and removes the TXT record proving control of a domain.
#[async_trait]
pub trait ChallengeSolver: Send + Sync {
    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), ChallengeError>;

    async fn cleanup(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), ChallengeError>;

    /// (overall timeout, poll interval) the caller uses while waiting for validation
    fn timeout(&self) -> (Duration, Duration) {
        (VALIDATION_TIMEOUT, VALIDATION_POLL_INTERVAL)
    }
}

/// TXT record expected by the CA for one authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeRecord {
    /// e.g. `_acme-challenge.example.com` (also for `*.example.com`)
    pub fqdn: String,
    /// base64url(SHA-256(key authorization))
    pub value: String,
}

impl ChallengeRecord {
    pub fn new(domain: &str, key_auth: &str) -> Self {
        let base = domain.trim_start_matches("*.").trim_end_matches('.');
        Self {
            fqdn: format!("{}{}", ACME_CHALLENGE_PREFIX, base),
            value: challenge_value(key_auth),
        }
    }
}

pub fn challenge_value(key_auth: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(key_auth.as_bytes()))
}
