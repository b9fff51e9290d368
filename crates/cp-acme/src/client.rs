use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use cp_common::CaInfo;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, ExternalAccountKey, Identifier,
    NewAccount, NewOrder, Order, OrderStatus,
};
use tracing::{debug, info, warn};

use crate::challenge::ChallengeSolver;
use crate::storage::AccountStorage;
use crate::types::{AcmeError, AcmeResult, CertificateResource};

/// Obtains certificates from a certificate authority.
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    /// Issue a certificate for `domains` (first entry is the main domain).
    /// `bundle` keeps the issuer chain in `certificate`; `existing_key` is a
    /// PEM key reused for the CSR when it parses.
    async fn obtain(
        &self,
        domains: &[String],
        bundle: bool,
        existing_key: Option<&str>,
    ) -> AcmeResult<CertificateResource>;
}

/// A challenge handed to the solver, remembered for cleanup
struct PresentedChallenge {
    domain: String,
    token: String,
    key_auth: String,
}

/// ACME client over instant-acme, validating orders with DNS-01.
pub struct AcmeClient {
    account: Account,
    solver: Arc<dyn ChallengeSolver>,
}

impl AcmeClient {
    /// Load the stored account for this CA/e-mail, or register a new one
    pub async fn connect(
        ca: &CaInfo,
        accounts: &AccountStorage,
        solver: Arc<dyn ChallengeSolver>,
    ) -> AcmeResult<Self> {
        let account = if accounts.is_initialized() {
            Self::load_account(accounts).await?
        } else {
            Self::create_account(ca, accounts).await?
        };
        Ok(Self { account, solver })
    }

    async fn create_account(ca: &CaInfo, accounts: &AccountStorage) -> AcmeResult<Account> {
        info!(ca = %ca.name, email = %ca.account_email, "Registering new ACME account");

        let eab = if ca.has_eab() {
            let hmac = URL_SAFE_NO_PAD
                .decode(ca.eab_hmac_key.trim_end_matches('='))
                .map_err(|e| AcmeError::InvalidEab(e.to_string()))?;
            Some(ExternalAccountKey::new(ca.eab_kid.clone(), &hmac))
        } else {
            None
        };

        let (account, credentials) = Account::create(
            &NewAccount {
                contact: &[&format!("mailto:{}", ca.account_email)],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            &ca.url,
            eab.as_ref(),
        )
        .await
        .map_err(|e| AcmeError::Account(format!("Failed to create account: {}", e)))?;

        let creds_json = serde_json::to_string_pretty(&credentials)
            .map_err(|e| AcmeError::Account(e.to_string()))?;
        accounts.save(&creds_json)?;

        info!(path = %accounts.account_path().display(), "ACME account saved");
        Ok(account)
    }

    async fn load_account(accounts: &AccountStorage) -> AcmeResult<Account> {
        debug!(path = %accounts.account_path().display(), "Loading existing ACME account");

        let creds_json = accounts.load()?;
        let credentials: AccountCredentials = serde_json::from_str(&creds_json)
            .map_err(|e| AcmeError::Account(format!("Corrupt account file: {}", e)))?;

        Account::from_credentials(credentials)
            .await
            .map_err(|e| AcmeError::Account(format!("Failed to load account: {}", e)))
    }

    /// Present every pending DNS-01 challenge and mark it ready.
    /// Returns what was presented, even on error, so it can be cleaned up.
    async fn present_all(&self, order: &mut Order, presented: &mut Vec<PresentedChallenge>) -> AcmeResult<()> {
        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| AcmeError::Protocol(format!("Failed to get authorizations: {}", e)))?;

        let mut ready_urls = Vec::new();
        for auth in &authorizations {
            if auth.status == AuthorizationStatus::Valid {
                debug!("Authorization already valid, skipping");
                continue;
            }

            let domain = match &auth.identifier {
                Identifier::Dns(d) => d.clone(),
            };
            let challenge = auth
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Dns01)
                .ok_or_else(|| AcmeError::NoDns01Challenge(domain.clone()))?;

            let key_auth = order.key_authorization(challenge);
            debug!(domain = %domain, "Presenting DNS-01 challenge");
            self.solver
                .present(&domain, &challenge.token, key_auth.as_str())
                .await?;

            presented.push(PresentedChallenge {
                domain,
                token: challenge.token.clone(),
                key_auth: key_auth.as_str().to_string(),
            });
            ready_urls.push(challenge.url.clone());
        }

        for url in &ready_urls {
            order
                .set_challenge_ready(url)
                .await
                .map_err(|e| AcmeError::Protocol(format!("Failed to set challenge ready: {}", e)))?;
        }
        Ok(())
    }

    /// Poll the order until it is ready for finalization
    async fn wait_ready(&self, order: &mut Order, main_domain: &str) -> AcmeResult<()> {
        let (timeout, interval) = self.solver.timeout();
        let started = Instant::now();

        loop {
            tokio::time::sleep(interval).await;
            order
                .refresh()
                .await
                .map_err(|e| AcmeError::Protocol(format!("Failed to refresh order: {}", e)))?;

            match order.state().status {
                OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                OrderStatus::Invalid => return Err(AcmeError::OrderInvalid(main_domain.to_string())),
                status => {
                    debug!(domain = %main_domain, status = ?status, "Order not ready yet");
                    if started.elapsed() > timeout {
                        return Err(AcmeError::Timeout(format!(
                            "order validation for {} after {:?}",
                            main_domain, timeout
                        )));
                    }
                }
            }
        }
    }

    async fn cleanup_all(&self, presented: &[PresentedChallenge]) {
        for c in presented {
            if let Err(e) = self.solver.cleanup(&c.domain, &c.token, &c.key_auth).await {
                warn!(domain = %c.domain, error = %e, "Failed to clean up challenge record");
            }
        }
    }
}

#[async_trait]
impl CertificateAuthority for AcmeClient {
    async fn obtain(
        &self,
        domains: &[String],
        bundle: bool,
        existing_key: Option<&str>,
    ) -> AcmeResult<CertificateResource> {
        let main_domain = domains
            .first()
            .ok_or_else(|| AcmeError::OrderCreation("empty domain list".to_string()))?;

        info!(domain = %main_domain, names = ?domains, "Requesting certificate");

        let identifiers: Vec<Identifier> = domains.iter().map(|d| Identifier::Dns(d.clone())).collect();
        let mut order = self
            .account
            .new_order(&NewOrder {
                identifiers: &identifiers,
            })
            .await
            .map_err(|e| AcmeError::OrderCreation(e.to_string()))?;

        // Records are removed whatever the validation outcome
        let mut presented = Vec::new();
        let validated = match self.present_all(&mut order, &mut presented).await {
            Ok(()) => self.wait_ready(&mut order, main_domain).await,
            Err(e) => Err(e),
        };
        self.cleanup_all(&presented).await;
        validated?;

        let reused = existing_key.and_then(|pem| match rcgen::KeyPair::from_pem(pem) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!(domain = %main_domain, error = %e, "Existing key unusable, generating a new one");
                None
            }
        });
        let key_pair = match reused {
            Some(key) => key,
            None => rcgen::KeyPair::generate()
                .map_err(|e| AcmeError::Csr(format!("Failed to generate key pair: {}", e)))?,
        };

        let mut params = rcgen::CertificateParams::new(domains.to_vec())
            .map_err(|e| AcmeError::Csr(e.to_string()))?;
        params.distinguished_name = rcgen::DistinguishedName::new();
        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| AcmeError::Csr(e.to_string()))?;

        order
            .finalize(csr.der())
            .await
            .map_err(|e| AcmeError::Finalization(e.to_string()))?;

        let (timeout, interval) = self.solver.timeout();
        let started = Instant::now();
        let chain = loop {
            match order.certificate().await {
                Ok(Some(chain)) => break chain,
                Ok(None) if started.elapsed() > timeout => {
                    return Err(AcmeError::Timeout(format!("certificate download for {}", main_domain)));
                }
                Ok(None) => {
                    debug!(domain = %main_domain, "Certificate not ready yet");
                    tokio::time::sleep(interval).await;
                }
                Err(e) => return Err(AcmeError::Finalization(format!("Failed to get certificate: {}", e))),
            }
        };

        info!(domain = %main_domain, "Certificate issued");
        Ok(build_resource(domains, &chain, bundle, key_pair.serialize_pem()))
    }
}

/// Split a PEM chain into its certificate blocks, leaf first
pub fn split_pem_chain(chain: &str) -> Vec<String> {
    const END: &str = "-----END CERTIFICATE-----";
    chain
        .split_inclusive(END)
        .map(str::trim)
        .filter(|block| block.ends_with(END))
        .map(|block| format!("{}\n", block))
        .collect()
}

/// Assemble the stored resource from a downloaded chain
pub fn build_resource(domains: &[String], chain: &str, bundle: bool, private_key: String) -> CertificateResource {
    let blocks = split_pem_chain(chain);
    let (leaf, issuers) = match blocks.split_first() {
        Some((leaf, rest)) => (leaf.clone(), rest.concat()),
        None => (chain.to_string(), String::new()),
    };

    CertificateResource {
        domain: domains.first().cloned().unwrap_or_default(),
        domains: domains.to_vec(),
        certificate: if bundle { format!("{}{}", leaf, issuers) } else { leaf },
        issuer_certificate: issuers,
        private_key,
    }
}
