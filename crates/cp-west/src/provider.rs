//! DNS-01 challenge provider backed by west.cn TXT records.

use std::sync::Arc;

use async_trait::async_trait;
use cp_acme::{ChallengeError, ChallengeRecord, ChallengeSolver};
use cp_dns::{extract_subdomain, ZoneResolver};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::api::WestClient;
use crate::{WestError, WestResult};

/// Records fetched when looking for an already existing TXT entry
const DUPLICATE_LIST_LIMIT: u32 = 100;

type SessionKey = [u8; 32];

/// In-flight challenge: where the TXT record lives and its registrar id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeSession {
    pub record_id: i64,
    pub zone: String,
}

pub struct WestDnsProvider {
    api: WestClient,
    zones: Arc<dyn ZoneResolver>,
    sessions: DashMap<SessionKey, ChallengeSession>,
    /// errcode meaning "record already exists"; `None` disables read-back recovery
    duplicate_errcode: Option<i64>,
}

impl WestDnsProvider {
    pub fn new(api: WestClient, zones: Arc<dyn ZoneResolver>, duplicate_errcode: Option<i64>) -> Self {
        Self {
            api,
            zones,
            sessions: DashMap::new(),
            duplicate_errcode,
        }
    }

    pub fn session(&self, domain: &str, token: &str, key_auth: &str) -> Option<ChallengeSession> {
        self.sessions
            .get(&session_key(domain, token, key_auth))
            .map(|s| s.value().clone())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Create the TXT record for a challenge and remember its id
    pub async fn add_challenge(&self, domain: &str, token: &str, key_auth: &str) -> WestResult<ChallengeSession> {
        let record = ChallengeRecord::new(domain, key_auth);

        let zone = self
            .zones
            .find_zone(&record.fqdn)
            .await
            .map_err(|e| WestError::ZoneResolution {
                fqdn: record.fqdn.clone(),
                reason: e.to_string(),
            })?;
        let host = extract_subdomain(&record.fqdn, &zone)?;
        info!(domain, zone = %zone, host = %host, "Presenting DNS-01 challenge");

        let record_id = match self.api.add_txt_record(&zone, &host, &record.value).await {
            Ok(id) => id,
            Err(WestError::Api { errcode, msg }) if Some(errcode) == self.duplicate_errcode => {
                warn!(domain, host = %host, errcode, msg = %msg, "TXT record already exists, reading it back");
                self.find_existing(&zone, &host, &record.value).await?
            }
            Err(e) => return Err(e),
        };

        let session = ChallengeSession { record_id, zone };
        if self
            .sessions
            .insert(session_key(domain, token, key_auth), session.clone())
            .is_some()
        {
            warn!(domain, "Replaced a live challenge session");
        }
        Ok(session)
    }

    /// Remove the session, then delete its TXT record
    pub async fn remove_challenge(&self, domain: &str, token: &str, key_auth: &str) -> WestResult<()> {
        let (_, session) = self
            .sessions
            .remove(&session_key(domain, token, key_auth))
            .ok_or_else(|| WestError::SessionNotFound(domain.to_string()))?;

        self.api.delete_record(&session.zone, session.record_id).await
    }

    async fn find_existing(&self, zone: &str, host: &str, value: &str) -> WestResult<i64> {
        let records = self.api.list_records(zone, DUPLICATE_LIST_LIMIT).await?;
        records
            .iter()
            .find(|r| r.record_type.eq_ignore_ascii_case("TXT") && r.item == host && r.value == value)
            .map(|r| {
                info!(zone, host, record_id = r.id, "Adopted existing TXT record");
                r.id
            })
            .ok_or_else(|| WestError::DuplicateNotFound { host: host.to_string() })
    }
}

#[async_trait]
impl ChallengeSolver for WestDnsProvider {
    async fn present(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), ChallengeError> {
        self.add_challenge(domain, token, key_auth)
            .await
            .map(|_| ())
            .map_err(into_challenge_error)
    }

    async fn cleanup(&self, domain: &str, token: &str, key_auth: &str) -> Result<(), ChallengeError> {
        self.remove_challenge(domain, token, key_auth)
            .await
            .map_err(into_challenge_error)
    }
}

fn into_challenge_error(e: WestError) -> ChallengeError {
    match e {
        WestError::ZoneResolution { fqdn, reason } => ChallengeError::ZoneResolution { fqdn, reason },
        WestError::SessionNotFound(domain) => ChallengeError::SessionNotFound(domain),
        other => ChallengeError::Provider(Box::new(other)),
    }
}

fn session_key(domain: &str, token: &str, key_auth: &str) -> SessionKey {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update(token.as_bytes());
    hasher.update(key_auth.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_is_per_challenge() {
        let a = session_key("example.com", "tok1", "tok1.thumb");
        assert_eq!(a, session_key("example.com", "tok1", "tok1.thumb"));
        assert_ne!(a, session_key("example.com", "tok2", "tok2.thumb"));
        assert_ne!(a, session_key("example.org", "tok1", "tok1.thumb"));
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            into_challenge_error(WestError::SessionNotFound("example.com".into())),
            ChallengeError::SessionNotFound(_)
        ));
        assert!(matches!(
            into_challenge_error(WestError::Api { errcode: 1, msg: "x".into() }),
            ChallengeError::Provider(_)
        ));
    }
}
