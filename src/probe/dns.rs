//! DNS backend: one A-record query against the target as a DNS server.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::net::UdpSocket;

use super::{enforce_timeout, ProbeBackend, ProbeError};

/// Probes a DNS server by timing an A query for a fixed name.
#[derive(Debug, Clone)]
pub struct DnsBackend {
    query_name: String,
}

impl DnsBackend {
    pub fn new(query_name: &str) -> Self {
        Self {
            query_name: query_name.trim_end_matches('.').to_string(),
        }
    }
}

#[async_trait]
impl ProbeBackend for DnsBackend {
    async fn probe(&self, host: &str, timeout: Duration) -> Result<Duration, ProbeError> {
        let server = server_address(host);
        let tx_id: u16 = rand::random();
        let packet = build_dns_query(tx_id, &self.query_name)?;

        let exchange = async {
            let bind_addr = if server.starts_with('[') { "[::]:0" } else { "0.0.0.0:0" };
            let socket = UdpSocket::bind(bind_addr)
                .await
                .map_err(|e| ProbeError::Network(format!("failed to bind socket: {}", e)))?;
            socket
                .connect(server.as_str())
                .await
                .map_err(|e| ProbeError::Network(format!("failed to connect to {}: {}", server, e)))?;

            let start = Instant::now();
            socket
                .send(&packet)
                .await
                .map_err(|e| ProbeError::Network(format!("failed to send: {}", e)))?;

            let mut response = [0u8; 512];
            let n = socket
                .recv(&mut response)
                .await
                .map_err(|e| ProbeError::Network(format!("failed to recv: {}", e)))?;
            let elapsed = start.elapsed();

            validate_response(&response[..n], tx_id)?;
            Ok::<_, ProbeError>(elapsed)
        };

        let rtt = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ProbeError::Timeout(timeout))??;

        enforce_timeout(rtt, timeout)
    }
}

/// Append the default DNS port unless one is given.
fn server_address(host: &str) -> String {
    if host.parse::<std::net::SocketAddr>().is_ok() {
        return host.to_string();
    }
    if host.parse::<std::net::Ipv6Addr>().is_ok() {
        return format!("[{}]:53", host);
    }
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{}:53", host)
    }
}

/// Build a recursive A/IN query for `name`.
fn build_dns_query(tx_id: u16, name: &str) -> Result<Vec<u8>, ProbeError> {
    let flags: u16 = 0x0100; // Standard query, recursion desired

    let mut packet = Vec::with_capacity(17 + name.len());
    packet.extend_from_slice(&tx_id.to_be_bytes());
    packet.extend_from_slice(&flags.to_be_bytes());
    packet.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    packet.extend_from_slice(&[0; 6]); // ANCOUNT, NSCOUNT, ARCOUNT

    for label in name.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(ProbeError::Config(format!("invalid query name: {}", name)));
        }
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);

    packet.extend_from_slice(&1u16.to_be_bytes()); // QTYPE A
    packet.extend_from_slice(&1u16.to_be_bytes()); // QCLASS IN

    Ok(packet)
}

fn validate_response(response: &[u8], tx_id: u16) -> Result<(), ProbeError> {
    if response.len() < 12 {
        return Err(ProbeError::Network(format!(
            "response too short: {} bytes",
            response.len()
        )));
    }

    let resp_tx_id = u16::from_be_bytes([response[0], response[1]]);
    if resp_tx_id != tx_id {
        return Err(ProbeError::Network(format!(
            "transaction ID mismatch: got {}, expected {}",
            resp_tx_id, tx_id
        )));
    }

    let rcode = response[3] & 0x0F;
    if rcode != 0 {
        return Err(ProbeError::Network(format!("DNS error RCODE: {}", rcode)));
    }

    Ok(())
}
