use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

use crate::packet::{self, ParsedResponse};
use crate::records::RecordType;
use crate::{DnsError, DnsResult};

/// Recursive nameservers queried in order until one answers.
pub struct Upstream {
    servers: Vec<SocketAddr>,
    timeout: Duration,
}

impl Upstream {
    /// Accepts `ip`, `ip:port`, `[v6]:port` or a bare IPv6 address. Entries that
    /// do not parse are dropped.
    pub fn new(servers: &[String], timeout: Duration) -> Self {
        let servers = servers.iter().filter_map(|s| parse_server(s)).collect();
        Self { servers, timeout }
    }

    pub fn servers(&self) -> &[SocketAddr] {
        &self.servers
    }

    /// Send a recursive query for `name`/`qtype` and return the parsed reply.
    /// Uses a fresh random TXID, validates the reply and falls back to TCP
    /// when the UDP answer is truncated.
    pub async fn query(&self, name: &str, qtype: RecordType) -> DnsResult<ParsedResponse> {
        if self.servers.is_empty() {
            return Err(DnsError::NoNameservers);
        }

        let txid: u16 = rand::rng().random();
        let query = packet::build_query(txid, name, qtype);

        for server in &self.servers {
            let raw = match self.query_udp(&query, *server, txid).await {
                Ok(raw) => raw,
                Err(e) => {
                    debug!("UDP query {} {} to {} failed: {}", qtype, name, server, e);
                    continue;
                }
            };

            let raw = if raw[2] & 0x02 != 0 {
                debug!("Response truncated from {}, retrying TCP", server);
                match self.query_tcp(&query, *server, txid).await {
                    Ok(tcp) => tcp,
                    Err(e) => {
                        debug!("TCP query to {} failed: {}", server, e);
                        continue;
                    }
                }
            } else {
                raw
            };

            match packet::parse_response(&raw) {
                Ok(parsed) => return Ok(parsed),
                Err(e) => {
                    debug!("Unparseable response from {}: {}", server, e);
                    continue;
                }
            }
        }

        Err(DnsError::AllNameserversFailed(name.to_string()))
    }

    async fn query_udp(&self, query: &[u8], server: SocketAddr, expected_txid: u16) -> DnsResult<Vec<u8>> {
        let bind_addr = if server.is_ipv4() {
            SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
        } else {
            SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.send_to(query, server).await?;

        let mut buf = vec![0u8; 4096];
        let (len, src) = timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| DnsError::Timeout)??;
        buf.truncate(len);

        if src.ip() != server.ip() {
            return Err(invalid(server, format!("unexpected source {}", src.ip())));
        }
        validate_reply(&buf, server, expected_txid)?;
        Ok(buf)
    }

    async fn query_tcp(&self, query: &[u8], server: SocketAddr, expected_txid: u16) -> DnsResult<Vec<u8>> {
        let mut stream = timeout(self.timeout, TcpStream::connect(server))
            .await
            .map_err(|_| DnsError::Timeout)??;

        // 2-byte length prefix
        stream.write_all(&(query.len() as u16).to_be_bytes()).await?;
        stream.write_all(query).await?;

        let mut len_buf = [0u8; 2];
        timeout(self.timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| DnsError::Timeout)??;
        let mut response = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        timeout(self.timeout, stream.read_exact(&mut response))
            .await
            .map_err(|_| DnsError::Timeout)??;

        validate_reply(&response, server, expected_txid)?;
        Ok(response)
    }
}

fn validate_reply(buf: &[u8], server: SocketAddr, expected_txid: u16) -> DnsResult<()> {
    if buf.len() < 12 {
        return Err(invalid(server, format!("response too short: {} bytes", buf.len())));
    }
    let txid = u16::from_be_bytes([buf[0], buf[1]]);
    if txid != expected_txid {
        return Err(invalid(
            server,
            format!("TXID mismatch: expected {:04x}, got {:04x}", expected_txid, txid),
        ));
    }
    if buf[2] & 0x80 == 0 {
        return Err(invalid(server, "response missing QR flag".to_string()));
    }
    Ok(())
}

fn invalid(server: SocketAddr, reason: String) -> DnsError {
    DnsError::InvalidResponse {
        server: server.to_string(),
        reason,
    }
}

fn parse_server(s: &str) -> Option<SocketAddr> {
    if s.contains("]:") {
        // IPv6 with port
        s.parse().ok()
    } else if s.contains(':') && s.matches(':').count() > 1 {
        // IPv6 without port
        format!("[{}]:53", s.trim_matches(|c| c == '[' || c == ']')).parse().ok()
    } else if s.contains(':') {
        // IPv4 with port
        s.parse().ok()
    } else {
        format!("{}:53", s).parse().ok()
    }
}
