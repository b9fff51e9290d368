//! Client side of the DNS wire format (RFC 1035): one-question queries out,
//! answer and authority sections back.

use thiserror::Error;

use crate::records::{DnsRecord, RData, RecordType, Soa, CLASS_IN};

const HEADER_LEN: usize = 12;
const MAX_POINTER_HOPS: usize = 16;
const MAX_NAME_LEN: usize = 253;

const FLAG_QR: u16 = 0x8000;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;

#[derive(Error, Debug)]
pub enum DnsParseError {
    #[error("Packet ends early: need {needed} bytes at offset {offset}")]
    Truncated { offset: usize, needed: usize },
    #[error("Name compression loop detected")]
    CompressionLoop,
    #[error("Label length byte {0:#04x} is not supported")]
    BadLabel(u8),
    #[error("Invalid UTF-8 in name")]
    InvalidUtf8,
    #[error("Name longer than {MAX_NAME_LEN} characters")]
    NameTooLong,
}

type ParseResult<T> = Result<T, DnsParseError>;

#[derive(Debug, Clone, Copy)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
    pub questions: u16,
    pub answers: u16,
    pub authorities: u16,
}

impl DnsHeader {
    pub fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    pub fn is_truncated(&self) -> bool {
        self.flags & FLAG_TC != 0
    }

    pub fn rcode(&self) -> u8 {
        (self.flags & 0x000F) as u8
    }
}

#[derive(Debug)]
pub struct ParsedResponse {
    pub header: DnsHeader,
    pub answers: Vec<DnsRecord>,
    pub authority: Vec<DnsRecord>,
}

/// Bounds-checked cursor over a received packet
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> ParseResult<&'a [u8]> {
        let end = self.pos + n;
        let bytes = self.buf.get(self.pos..end).ok_or(DnsParseError::Truncated {
            offset: self.pos,
            needed: n,
        })?;
        self.pos = end;
        Ok(bytes)
    }

    fn u16(&mut self) -> ParseResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> ParseResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a possibly compressed name; the cursor ends after the name as
    /// written at the current position.
    fn name(&mut self) -> ParseResult<String> {
        let (name, next) = parse_name(self.buf, self.pos)?;
        self.pos = next;
        Ok(name)
    }
}

/// Decode the name at `offset`, following compression pointers.
/// Returns the name and the offset right after it.
pub fn parse_name(buf: &[u8], offset: usize) -> ParseResult<(String, usize)> {
    let mut labels: Vec<&str> = Vec::new();
    let mut length = 0;
    let mut pos = offset;
    let mut resume = None;
    let mut hops = 0;

    loop {
        let len = *buf.get(pos).ok_or(DnsParseError::Truncated { offset: pos, needed: 1 })?;
        match len & 0xC0 {
            0xC0 => {
                let low = *buf.get(pos + 1).ok_or(DnsParseError::Truncated { offset: pos, needed: 2 })?;
                resume.get_or_insert(pos + 2);
                hops += 1;
                if hops > MAX_POINTER_HOPS {
                    return Err(DnsParseError::CompressionLoop);
                }
                pos = (usize::from(len & 0x3F) << 8) | usize::from(low);
            }
            0x00 if len == 0 => {
                let end = resume.unwrap_or(pos + 1);
                return Ok((labels.join("."), end));
            }
            0x00 => {
                let start = pos + 1;
                let bytes = buf
                    .get(start..start + usize::from(len))
                    .ok_or(DnsParseError::Truncated { offset: start, needed: usize::from(len) })?;
                let label = std::str::from_utf8(bytes).map_err(|_| DnsParseError::InvalidUtf8)?;
                length += label.len() + usize::from(!labels.is_empty());
                if length > MAX_NAME_LEN {
                    return Err(DnsParseError::NameTooLong);
                }
                labels.push(label);
                pos = start + usize::from(len);
            }
            _ => return Err(DnsParseError::BadLabel(len)),
        }
    }
}

/// Append `name` as uncompressed labels. A trailing dot is ignored.
pub fn encode_name(name: &str, buf: &mut Vec<u8>) {
    for label in name.trim_end_matches('.').split('.').filter(|l| !l.is_empty()) {
        let bytes = &label.as_bytes()[..label.len().min(63)];
        buf.push(bytes.len() as u8);
        buf.extend_from_slice(bytes);
    }
    buf.push(0);
}

/// Recursive query (RD set) with a single IN question
pub fn build_query(id: u16, name: &str, qtype: RecordType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + name.len() + 6);
    for field in [id, FLAG_RD, 1, 0, 0, 0] {
        buf.extend_from_slice(&field.to_be_bytes());
    }
    encode_name(name, &mut buf);
    buf.extend_from_slice(&u16::from(qtype).to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    buf
}

/// Parse the header, skip the questions, and decode the answer and authority
/// sections. The additional section is ignored.
pub fn parse_response(buf: &[u8]) -> ParseResult<ParsedResponse> {
    let mut reader = Reader::new(buf);
    let header = DnsHeader {
        id: reader.u16()?,
        flags: reader.u16()?,
        questions: reader.u16()?,
        answers: reader.u16()?,
        authorities: reader.u16()?,
    };
    reader.u16()?; // ARCOUNT

    for _ in 0..header.questions {
        reader.name()?;
        reader.take(4)?;
    }

    let answers = (0..header.answers)
        .map(|_| read_record(&mut reader))
        .collect::<ParseResult<Vec<_>>>()?;
    let authority = (0..header.authorities)
        .map(|_| read_record(&mut reader))
        .collect::<ParseResult<Vec<_>>>()?;

    Ok(ParsedResponse {
        header,
        answers,
        authority,
    })
}

fn read_record(reader: &mut Reader<'_>) -> ParseResult<DnsRecord> {
    let owner = reader.name()?.to_lowercase();
    let rtype = RecordType::from(reader.u16()?);
    reader.u16()?; // class
    let ttl = reader.u32()?;
    let rdlength = usize::from(reader.u16()?);

    let rdata_start = reader.pos;
    reader.take(rdlength)?;

    // Names inside rdata may point anywhere in the packet, so decode against
    // the whole buffer and only trust the declared length for the cursor.
    let mut rdata_reader = Reader {
        buf: reader.buf,
        pos: rdata_start,
    };
    let rdata = match rtype {
        RecordType::Cname => RData::Cname(rdata_reader.name()?.to_lowercase()),
        RecordType::Soa => RData::Soa(Soa {
            primary_ns: rdata_reader.name()?,
            mailbox: rdata_reader.name()?,
            serial: rdata_reader.u32()?,
        }),
        RecordType::Other(_) => RData::Opaque,
    };

    Ok(DnsRecord {
        owner,
        rtype,
        ttl,
        rdata,
    })
}

/// Turn `query` into a reply carrying `answers`, for feeding the parser in tests
#[cfg(test)]
pub(crate) fn build_test_response(
    query: &[u8],
    rcode: u8,
    answers: &[(&str, RecordType, Vec<u8>)],
) -> Vec<u8> {
    let mut buf = query.to_vec();
    let flags = u16::from_be_bytes([buf[2], buf[3]]) | FLAG_QR | u16::from(rcode & 0x0F);
    buf[2..4].copy_from_slice(&flags.to_be_bytes());
    buf[6..8].copy_from_slice(&(answers.len() as u16).to_be_bytes());
    for (owner, rtype, rdata) in answers {
        encode_name(owner, &mut buf);
        buf.extend_from_slice(&u16::from(*rtype).to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf.extend_from_slice(&300u32.to_be_bytes());
        buf.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
        buf.extend_from_slice(rdata);
    }
    buf
}

#[cfg(test)]
pub(crate) fn soa_rdata(primary_ns: &str, mailbox: &str) -> Vec<u8> {
    let mut rdata = Vec::new();
    encode_name(primary_ns, &mut rdata);
    encode_name(mailbox, &mut rdata);
    for v in [2024010101u32, 7200, 3600, 1209600, 300] {
        rdata.extend_from_slice(&v.to_be_bytes());
    }
    rdata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_and_parse_name() {
        let mut buf = Vec::new();
        encode_name("_acme-challenge.Example.com.", &mut buf);
        assert_eq!(buf, b"\x0f_acme-challenge\x07Example\x03com\x00");

        let (name, end) = parse_name(&buf, 0).unwrap();
        assert_eq!(name, "_acme-challenge.Example.com");
        assert_eq!(end, buf.len());

        let mut root = Vec::new();
        encode_name(".", &mut root);
        assert_eq!(root, [0]);
        assert_eq!(parse_name(&root, 0).unwrap(), (String::new(), 1));
    }

    #[test]
    fn test_parse_name_follows_pointer() {
        let mut buf = Vec::new();
        encode_name("example.com", &mut buf);
        let www = buf.len();
        buf.extend_from_slice(b"\x03www\xC0\x00");

        let (name, end) = parse_name(&buf, www).unwrap();
        assert_eq!(name, "www.example.com");
        assert_eq!(end, buf.len());
    }

    #[test]
    fn test_parse_name_rejects_bad_input() {
        assert!(matches!(parse_name(&[0xC0, 0x00], 0), Err(DnsParseError::CompressionLoop)));
        assert!(matches!(parse_name(&[0x40, b'a'], 0), Err(DnsParseError::BadLabel(0x40))));
        assert!(matches!(parse_name(b"\x05abc", 0), Err(DnsParseError::Truncated { .. })));
    }

    #[test]
    fn test_build_query_layout() {
        let query = build_query(0xBEEF, "example.com", RecordType::Soa);
        assert_eq!(&query[0..4], &[0xBE, 0xEF, 0x01, 0x00]);
        assert_eq!(&query[4..12], &[0, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&query[query.len() - 4..], &[0x00, 0x06, 0x00, 0x01]);
    }

    #[test]
    fn test_parse_soa_answer_next_to_undecoded_record() {
        let query = build_query(7, "example.com", RecordType::Soa);
        let response = build_test_response(
            &query,
            RCODE_NOERROR,
            &[
                ("Example.com", RecordType::Soa, soa_rdata("ns1.example.com", "hostmaster.example.com")),
                ("_acme-challenge.example.com", RecordType::Other(16), b"\x03abc".to_vec()),
            ],
        );

        let parsed = parse_response(&response).unwrap();
        assert_eq!(parsed.header.id, 7);
        assert!(parsed.header.is_response());
        assert!(!parsed.header.is_truncated());
        assert_eq!(parsed.header.rcode(), RCODE_NOERROR);
        assert_eq!(parsed.answers.len(), 2);

        let soa = &parsed.answers[0];
        assert_eq!(soa.owner, "example.com");
        assert_eq!(
            soa.rdata,
            RData::Soa(Soa {
                primary_ns: "ns1.example.com".to_string(),
                mailbox: "hostmaster.example.com".to_string(),
                serial: 2024010101,
            })
        );
        assert_eq!(parsed.answers[1].rtype, RecordType::Other(16));
        assert_eq!(parsed.answers[1].rdata, RData::Opaque);
    }

    #[test]
    fn test_unknown_types_are_opaque() {
        let query = build_query(9, "example.com", RecordType::Soa);
        let response = build_test_response(&query, RCODE_NOERROR, &[("example.com", RecordType::Other(1), vec![192, 0, 2, 1])]);
        let parsed = parse_response(&response).unwrap();
        assert_eq!(parsed.answers[0].rtype, RecordType::Other(1));
        assert_eq!(parsed.answers[0].rdata, RData::Opaque);
    }

    #[test]
    fn test_truncated_response_is_error() {
        let query = build_query(7, "example.com", RecordType::Soa);
        let mut response = build_test_response(
            &query,
            RCODE_NOERROR,
            &[("example.com", RecordType::Soa, soa_rdata("ns1.example.com", "h.example.com"))],
        );
        response.truncate(response.len() - 10);
        assert!(matches!(parse_response(&response), Err(DnsParseError::Truncated { .. })));
    }
}
