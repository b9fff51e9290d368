//! certpilot ACME certificate management
//!
//! Certificate authority client (Let's Encrypt / ZeroSSL over DNS-01), on-disk
//! certificate and account storage, and the renewal decision.

mod client;
mod storage;
pub mod challenge;
pub mod decision;
pub mod types;

pub use challenge::{ChallengeError, ChallengeRecord, ChallengeSolver};
pub use client::{build_resource, split_pem_chain, AcmeClient, CertificateAuthority};
pub use decision::{should_renew, RenewReason, RenewalDecision};
pub use storage::{parse_certificates, AccountStorage, CertificateStore, EXT_CERT, EXT_ISSUER, EXT_KEY};
pub use types::{AcmeError, AcmeResult, CertificateResource, CertificateSummary, StoreError, StoreResult};
