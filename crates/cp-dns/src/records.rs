//! Record model for zone-cut discovery. Only the types the SOA walk
//! inspects are decoded; everything else is kept as an opaque type code.

use std::fmt;

pub const CLASS_IN: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Cname,
    Soa,
    Other(u16),
}

impl From<u16> for RecordType {
    fn from(code: u16) -> Self {
        match code {
            5 => Self::Cname,
            6 => Self::Soa,
            other => Self::Other(other),
        }
    }
}

impl From<RecordType> for u16 {
    fn from(rtype: RecordType) -> Self {
        match rtype {
            RecordType::Cname => 5,
            RecordType::Soa => 6,
            RecordType::Other(code) => code,
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cname => f.write_str("CNAME"),
            Self::Soa => f.write_str("SOA"),
            Self::Other(code) => write!(f, "TYPE{}", code),
        }
    }
}

/// Leading fields of an SOA record. The timers are not needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Soa {
    pub primary_ns: String,
    pub mailbox: String,
    pub serial: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    Cname(String),
    Soa(Soa),
    /// Not decoded
    Opaque,
}

#[derive(Debug, Clone)]
pub struct DnsRecord {
    /// Lowercased, without trailing dot
    pub owner: String,
    pub rtype: RecordType,
    pub ttl: u32,
    pub rdata: RData,
}

impl DnsRecord {
    pub fn is_soa(&self) -> bool {
        matches!(self.rdata, RData::Soa(_))
    }

    pub fn is_cname(&self) -> bool {
        self.rtype == RecordType::Cname
    }
}
