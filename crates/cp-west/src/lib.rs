//! west.cn registrar support: DNS API client and the DNS-01 challenge provider
//! built on it.

pub mod api;
pub mod provider;

pub use api::{WestClient, WestRecord, DEFAULT_API_BASE};
pub use provider::{ChallengeSession, WestDnsProvider};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WestError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse registrar response: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Registrar API error: errcode:{errcode} msg:{msg}")]
    Api { errcode: i64, msg: String },

    #[error("No data in {0} response")]
    MissingData(&'static str),

    #[error("Could not find zone for {fqdn}: {reason}")]
    ZoneResolution { fqdn: String, reason: String },

    #[error("Invalid challenge host: {0}")]
    Host(#[from] cp_dns::DnsError),

    #[error("Duplicate TXT record {host} reported but not found in the record list")]
    DuplicateNotFound { host: String },

    #[error("No challenge session for {0}")]
    SessionNotFound(String),
}

pub type WestResult<T> = Result<T, WestError>;
