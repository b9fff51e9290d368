//! Renewal decision from locally stored certificate data.

use std::fmt;

use chrono::{DateTime, Duration, Utc};

use crate::types::{CertificateSummary, StoreError, StoreResult};

/// Certificates with less validity left than this are renewed
pub const RENEWAL_WINDOW_HOURS: i64 = 72;

pub fn renewal_window() -> Duration {
    Duration::hours(RENEWAL_WINDOW_HOURS)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewReason {
    /// Nothing stored for the domain
    Missing,
    /// Stored file could not be read or parsed
    Unreadable(String),
    /// Less than the renewal window left (negative when already expired)
    Expiring { remaining: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalDecision {
    Renew(RenewReason),
    Keep { remaining: Duration },
}

impl RenewalDecision {
    pub fn should_renew(&self) -> bool {
        matches!(self, Self::Renew(_))
    }
}

impl fmt::Display for RenewalDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Renew(RenewReason::Missing) => write!(f, "renew: no certificate on disk"),
            Self::Renew(RenewReason::Unreadable(e)) => write!(f, "renew: unreadable certificate ({})", e),
            Self::Renew(RenewReason::Expiring { remaining }) => {
                write!(f, "renew: {}h of validity left", remaining.num_hours())
            }
            Self::Keep { remaining } => write!(f, "keep: {} days of validity left", remaining.num_days()),
        }
    }
}

/// Decide from the result of a store read. The leaf is the first certificate.
pub fn should_renew(existing: &StoreResult<Vec<CertificateSummary>>, now: DateTime<Utc>) -> RenewalDecision {
    let leaf = match existing {
        Ok(certs) => match certs.first() {
            Some(leaf) => leaf,
            None => return RenewalDecision::Renew(RenewReason::Missing),
        },
        Err(StoreError::NotFound(_)) => return RenewalDecision::Renew(RenewReason::Missing),
        Err(e) => return RenewalDecision::Renew(RenewReason::Unreadable(e.to_string())),
    };

    let remaining = leaf.not_after - now;
    if remaining < renewal_window() {
        RenewalDecision::Renew(RenewReason::Expiring { remaining })
    } else {
        RenewalDecision::Keep { remaining }
    }
}
