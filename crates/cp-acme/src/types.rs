use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::challenge::ChallengeError;

/// Certificate issued by the CA for a set of names, as handed to the store.
#[derive(Debug, Clone)]
pub struct CertificateResource {
    /// Main domain, used to name the files on disk
    pub domain: String,
    /// Every name covered by the certificate (e.g. `example.com`, `*.example.com`)
    pub domains: Vec<String>,
    /// Full chain when bundled, leaf only otherwise
    pub certificate: String,
    /// Issuer chain without the leaf
    pub issuer_certificate: String,
    /// PKCS#8 PEM private key
    pub private_key: String,
}

/// Subset of an X.509 certificate the renewal logic needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    pub not_after: DateTime<Utc>,
}

/// Sidecar metadata written next to each certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateMetadata {
    pub domain: String,
    pub domains: Vec<String>,
    pub not_after: Option<DateTime<Utc>>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No certificate stored for {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to parse certificate: {0}")]
    CertificateParse(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum AcmeError {
    #[error("Failed to create or load ACME account: {0}")]
    Account(String),

    #[error("Invalid EAB credentials: {0}")]
    InvalidEab(String),

    #[error("Failed to create certificate order: {0}")]
    OrderCreation(String),

    #[error("No DNS-01 challenge available for '{0}'")]
    NoDns01Challenge(String),

    #[error("Challenge error: {0}")]
    Challenge(#[from] ChallengeError),

    #[error("Order became invalid for {0}")]
    OrderInvalid(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Failed to build CSR: {0}")]
    Csr(String),

    #[error("Failed to finalize certificate: {0}")]
    Finalization(String),

    #[error("ACME protocol error: {0}")]
    Protocol(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

pub type AcmeResult<T> = Result<T, AcmeError>;
