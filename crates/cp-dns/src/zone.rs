//! Authoritative zone discovery via SOA lookups.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::packet::{ParsedResponse, RCODE_NOERROR, RCODE_NXDOMAIN};
use crate::records::RecordType;
use crate::upstream::Upstream;
use crate::{DnsError, DnsResult};

/// Resolves the zone (apex) that is authoritative for a name.
#[async_trait]
pub trait ZoneResolver: Send + Sync {
    /// Returns the zone apex without a trailing dot, e.g. `example.com`.
    async fn find_zone(&self, fqdn: &str) -> DnsResult<String>;
}

/// What one SOA query told us about a candidate name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SoaAnswer {
    /// An SOA was returned; the owner name is the zone.
    Zone(String),
    /// Name exists but carries no SOA, or is an alias. Try the parent.
    NoData,
    /// Name does not exist. Try the parent.
    NxDomain,
}

/// Zone resolver backed by recursive SOA queries, with a per-process cache.
pub struct SoaZoneResolver {
    upstream: Upstream,
    cache: DashMap<String, String>,
}

impl SoaZoneResolver {
    pub fn new(upstream: Upstream) -> Self {
        Self {
            upstream,
            cache: DashMap::new(),
        }
    }

    pub fn from_nameservers(servers: &[String], timeout: Duration) -> Self {
        Self::new(Upstream::new(servers, timeout))
    }

    pub fn cached(&self, fqdn: &str) -> Option<String> {
        self.cache.get(&normalize(fqdn)).map(|z| z.value().clone())
    }
}

#[async_trait]
impl ZoneResolver for SoaZoneResolver {
    async fn find_zone(&self, fqdn: &str) -> DnsResult<String> {
        let fqdn = normalize(fqdn);
        if let Some(zone) = self.cache.get(&fqdn) {
            return Ok(zone.value().clone());
        }

        for candidate in zone_candidates(&fqdn) {
            let response = self.upstream.query(candidate, RecordType::Soa).await?;
            match classify_soa_response(candidate, &response)? {
                SoaAnswer::Zone(zone) => {
                    debug!("Zone for {} is {}", fqdn, zone);
                    self.cache.insert(fqdn.clone(), zone.clone());
                    return Ok(zone);
                }
                SoaAnswer::NoData | SoaAnswer::NxDomain => continue,
            }
        }

        Err(DnsError::ZoneNotFound(fqdn))
    }
}

/// Strip the `.zone` suffix from `fqdn`. Fails when `fqdn` is the zone itself
/// or lies outside it.
pub fn extract_subdomain(fqdn: &str, zone: &str) -> DnsResult<String> {
    let fqdn = normalize(fqdn);
    let zone = normalize(zone);

    let not_sub = || DnsError::NotASubdomain {
        fqdn: fqdn.clone(),
        zone: zone.clone(),
    };

    if fqdn == zone {
        return Err(not_sub());
    }
    fqdn.strip_suffix(&zone)
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|sub| !sub.is_empty())
        .map(str::to_string)
        .ok_or_else(not_sub)
}

/// The name itself, then each parent, down to the TLD.
pub(crate) fn zone_candidates(fqdn: &str) -> impl Iterator<Item = &str> {
    let mut rest = Some(fqdn);
    std::iter::from_fn(move || {
        let current = rest?.trim_start_matches('.');
        if current.is_empty() {
            rest = None;
            return None;
        }
        rest = current.split_once('.').map(|(_, parent)| parent);
        Some(current)
    })
}

pub(crate) fn classify_soa_response(name: &str, response: &ParsedResponse) -> DnsResult<SoaAnswer> {
    match response.header.rcode() {
        RCODE_NOERROR => {
            if response.answers.iter().any(|r| r.is_cname()) {
                return Ok(SoaAnswer::NoData);
            }
            Ok(response
                .answers
                .iter()
                .find(|r| r.is_soa())
                .map(|soa| SoaAnswer::Zone(normalize(&soa.owner)))
                .unwrap_or(SoaAnswer::NoData))
        }
        RCODE_NXDOMAIN => Ok(SoaAnswer::NxDomain),
        rcode => Err(DnsError::UnexpectedRcode {
            name: name.to_string(),
            rcode,
        }),
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}
