//! Minimal DNS client used to locate the authoritative zone of a challenge name.
//!
//! The wire codec only covers what SOA discovery needs: building a single-question
//! query and parsing the answer section of the reply.

pub mod packet;
pub mod records;
pub mod upstream;
pub mod zone;

pub use upstream::Upstream;
pub use zone::{extract_subdomain, SoaZoneResolver, ZoneResolver};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DnsError {
    #[error("Malformed DNS response: {0}")]
    Parse(#[from] packet::DnsParseError),

    #[error("DNS transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DNS query timed out")]
    Timeout,

    #[error("No usable nameserver configured")]
    NoNameservers,

    #[error("All nameservers failed for {0}")]
    AllNameserversFailed(String),

    #[error("Invalid response from {server}: {reason}")]
    InvalidResponse { server: String, reason: String },

    #[error("Unexpected rcode {rcode} for {name}")]
    UnexpectedRcode { name: String, rcode: u8 },

    #[error("Could not find the start of authority for {0}")]
    ZoneNotFound(String),

    #[error("{fqdn} is not a subdomain of {zone}")]
    NotASubdomain { fqdn: String, zone: String },
}

pub type DnsResult<T> = Result<T, DnsError>;
