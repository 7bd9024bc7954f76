use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use rand::Rng;
use tokio::net::{TcpStream, UdpSocket};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::error::{DnsError, DnsResult};
use crate::packet::{build_query, parse_response_sections, ParsedResponse};
use crate::records::RecordType;

/// Sends single questions straight to a chosen server.
#[allow(async_fn_in_trait)]
pub trait DnsQuerier {
    async fn query(
        &self,
        server: SocketAddr,
        name: &str,
        qtype: RecordType,
        recursion_desired: bool,
    ) -> DnsResult<ParsedResponse>;

    /// Resolve a host name through the system resolver.
    async fn resolve_host(&self, host: &str) -> DnsResult<Vec<IpAddr>>;
}

/// Parse `host`, `host:port`, `v6` or `[v6]:port` into a socket address,
/// defaulting to port 53. Returns `None` for names that need resolving.
pub fn parse_server_addr(s: &str) -> Option<SocketAddr> {
    if s.contains(':') && !s.starts_with('[') && s.matches(':').count() > 1 {
        // IPv6 without port
        format!("[{}]:53", s).parse().ok()
    } else if s.contains("]:") || s.contains(':') {
        s.parse().ok()
    } else {
        format!("{}:53", s).parse().ok()
    }
}

/// UDP querier with TCP fallback for truncated answers.
pub struct UdpQuerier {
    timeout: Duration,
}

impl UdpQuerier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn query_udp(&self, query: &[u8], server: SocketAddr, expected_txid: u16) -> io::Result<Vec<u8>> {
        let bind_addr: SocketAddr = if server.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.send_to(query, server).await?;

        let mut buf = vec![0u8; 4096];
        let (len, src) = timeout(self.timeout, socket.recv_from(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "no answer"))??;
        buf.truncate(len);

        // Only accept the answer from the server we asked, for our TXID
        if src.ip() != server.ip() {
            return Err(io::Error::other(format!(
                "response from unexpected source {} (expected {})",
                src.ip(),
                server.ip()
            )));
        }
        if buf.len() < 12 {
            return Err(io::Error::other(format!("response too short: {} bytes", buf.len())));
        }
        let response_txid = u16::from_be_bytes([buf[0], buf[1]]);
        if response_txid != expected_txid {
            return Err(io::Error::other(format!(
                "TXID mismatch: expected {:04x}, got {:04x}",
                expected_txid, response_txid
            )));
        }
        if buf[2] & 0x80 == 0 {
            return Err(io::Error::other("response missing QR flag"));
        }

        Ok(buf)
    }

    async fn query_tcp(&self, query: &[u8], server: SocketAddr) -> io::Result<Vec<u8>> {
        let elapsed = |_| io::Error::new(io::ErrorKind::TimedOut, "no answer");
        let mut stream = timeout(self.timeout, TcpStream::connect(server))
            .await
            .map_err(elapsed)??;

        // TCP DNS: 2-byte length prefix
        let len_bytes = (query.len() as u16).to_be_bytes();
        stream.write_all(&len_bytes).await?;
        stream.write_all(query).await?;

        let mut len_buf = [0u8; 2];
        timeout(self.timeout, stream.read_exact(&mut len_buf))
            .await
            .map_err(elapsed)??;
        let response_len = u16::from_be_bytes(len_buf) as usize;

        let mut response = vec![0u8; response_len];
        timeout(self.timeout, stream.read_exact(&mut response))
            .await
            .map_err(elapsed)??;
        Ok(response)
    }
}

impl DnsQuerier for UdpQuerier {
    async fn query(
        &self,
        server: SocketAddr,
        name: &str,
        qtype: RecordType,
        recursion_desired: bool,
    ) -> DnsResult<ParsedResponse> {
        let failed = |e: io::Error| DnsError::Query {
            server: server.to_string(),
            reason: e.to_string(),
        };

        let txid: u16 = rand::rng().random();
        let query = build_query(txid, name, qtype, recursion_desired);

        let response = self.query_udp(&query, server, txid).await.map_err(failed)?;
        let mut parsed = parse_response_sections(&response)?;
        if parsed.header.is_truncated() {
            debug!("Response truncated from {}, retrying TCP", server);
            let response = self.query_tcp(&query, server).await.map_err(failed)?;
            parsed = parse_response_sections(&response)?;
        }

        if let Some(code) = parsed.header.server_failure() {
            return Err(DnsError::Query {
                server: server.to_string(),
                reason: format!("server answered {}", code),
            });
        }
        Ok(parsed)
    }

    async fn resolve_host(&self, host: &str) -> DnsResult<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        let addrs = tokio::net::lookup_host((host.trim_end_matches('.'), 53))
            .await
            .map_err(|e| DnsError::Resolve {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_addr() {
        assert_eq!(parse_server_addr("1.1.1.1"), Some("1.1.1.1:53".parse().unwrap()));
        assert_eq!(parse_server_addr("127.0.0.1:5353"), Some("127.0.0.1:5353".parse().unwrap()));
        assert_eq!(parse_server_addr("2001:db8::1"), Some("[2001:db8::1]:53".parse().unwrap()));
        assert_eq!(parse_server_addr("[2001:db8::1]:5353"), Some("[2001:db8::1]:5353".parse().unwrap()));
        assert_eq!(parse_server_addr("ns1.example.com"), None);
    }

    #[tokio::test]
    async fn test_resolve_literal_ip() {
        let querier = UdpQuerier::new(Duration::from_millis(100));
        let ips = querier.resolve_host("192.0.2.53").await.unwrap();
        assert_eq!(ips, vec!["192.0.2.53".parse::<IpAddr>().unwrap()]);
    }
}
