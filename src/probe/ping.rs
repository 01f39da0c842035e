//! ICMP echo backend with native sockets and a `ping` command fallback.
//!
//! Native probes run the blocking socket exchange on `spawn_blocking` so the
//! measured round trip is not skewed by the async scheduler.

use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{enforce_timeout, ProbeBackend, ProbeError};

const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;

/// ICMP capability state
#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    /// Native ICMP sockets are available
    Native,
    /// Only command fallback is available
    CommandOnly,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Identifier and sequence for one echo request.
fn next_echo_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn detect_icmp_capability() -> IcmpCapability {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (RAW socket, privileged)");
        return IcmpCapability::Native;
    }

    // Unprivileged on Linux when ping_group_range allows it, and on macOS
    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        tracing::info!("Ping probe: using native ICMP (DGRAM socket, unprivileged)");
        return IcmpCapability::Native;
    }

    tracing::info!("Ping probe: native ICMP unavailable, using command fallback");
    IcmpCapability::CommandOnly
}

/// ICMP echo probe backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct IcmpBackend;

impl IcmpBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProbeBackend for IcmpBackend {
    async fn probe(&self, host: &str, timeout: Duration) -> Result<Duration, ProbeError> {
        let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);

        let rtt = if capability == IcmpCapability::Native {
            match native_ping(host, timeout).await {
                Ok(rtt) => rtt,
                Err(NativeFailure::Denied(e)) => {
                    tracing::warn!(
                        "Native ping to {} not permitted ({}), falling back to command",
                        host,
                        e
                    );
                    run_ping_command(host, timeout).await?
                }
                Err(NativeFailure::Probe(e)) => return Err(e),
            }
        } else {
            run_ping_command(host, timeout).await?
        };

        enforce_timeout(rtt, timeout)
    }
}

/// Failure of the native path. Permission problems switch to the command.
#[derive(Debug)]
enum NativeFailure {
    Denied(std::io::Error),
    Probe(ProbeError),
}

impl From<std::io::Error> for NativeFailure {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::PermissionDenied {
            NativeFailure::Denied(e)
        } else {
            NativeFailure::Probe(ProbeError::Network(e.to_string()))
        }
    }
}

async fn native_ping(host: &str, timeout: Duration) -> Result<Duration, NativeFailure> {
    // DNS is async, so resolve before moving to the blocking pool
    let ip = resolve_address(host).await.map_err(NativeFailure::Probe)?;

    tokio::task::spawn_blocking(move || echo_blocking(ip, timeout))
        .await
        .map_err(|e| NativeFailure::Probe(ProbeError::Network(format!("spawn_blocking failed: {}", e))))?
}

/// Resolve hostname to IP address.
async fn resolve_address(address: &str) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host((address, 0))
        .await
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed for {}: {}", address, e)))?
        .next()
        .map(|sa| sa.ip())
        .ok_or_else(|| ProbeError::Network(format!("No addresses found for {}", address)))
}

/// Time left for the next `recv`, or `None` once the deadline has passed.
///
/// Never below 1 ms: a sub-microsecond value becomes a zero `timeval`,
/// which the kernel reads as "block forever".
fn read_timeout(timeout: Duration, elapsed: Duration) -> Option<Duration> {
    timeout
        .checked_sub(elapsed)
        .filter(|d| !d.is_zero())
        .map(|d| d.max(MIN_READ_TIMEOUT))
}

/// Send one echo request and wait for the matching reply.
fn echo_blocking(ip: IpAddr, timeout: Duration) -> Result<Duration, NativeFailure> {
    let (domain, protocol, request_type, reply_type) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, ICMPV4_ECHO_REQUEST, ICMPV4_ECHO_REPLY),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, ICMPV6_ECHO_REQUEST, ICMPV6_ECHO_REPLY),
    };

    let (socket, raw) = match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(socket) => (socket, true),
        Err(_) => (Socket::new(domain, Type::DGRAM, Some(protocol))?, false),
    };
    socket.set_write_timeout(Some(timeout))?;
    socket.connect(&SocketAddr::new(ip, 0).into())?;

    let (identifier, sequence) = next_echo_id();
    // The kernel fills in the ICMPv6 checksum
    let packet = build_echo_request(request_type, identifier, sequence, ip.is_ipv4());
    let has_ip_header = raw && ip.is_ipv4();

    let start = Instant::now();
    socket.send(&packet)?;

    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
    loop {
        let remaining = read_timeout(timeout, start.elapsed())
            .ok_or(NativeFailure::Probe(ProbeError::Timeout(timeout)))?;
        socket.set_read_timeout(Some(remaining))?;

        let len = match socket.recv(&mut buf) {
            Ok(len) => len,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Err(NativeFailure::Probe(ProbeError::Timeout(timeout)));
            }
            Err(e) => return Err(e.into()),
        };
        let elapsed = start.elapsed();

        // SAFETY: recv initialized the first `len` bytes
        let reply = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
        if is_echo_reply(reply, reply_type, identifier, sequence, has_ip_header, raw) {
            return Ok(elapsed);
        }
    }
}

/// Check whether `buf` is the reply to our request.
///
/// Datagram sockets get their identifier rewritten by the kernel, so only
/// raw sockets compare it.
fn is_echo_reply(
    buf: &[u8],
    reply_type: u8,
    identifier: u16,
    sequence: u16,
    has_ip_header: bool,
    check_identifier: bool,
) -> bool {
    let offset = match (has_ip_header, buf.first()) {
        (true, Some(first)) => usize::from(first & 0x0F) * 4,
        (true, None) => return false,
        (false, _) => 0,
    };
    let Some(icmp) = buf.get(offset..) else {
        return false;
    };
    if icmp.len() < 8 || icmp[0] != reply_type {
        return false;
    }

    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    let reply_seq = u16::from_be_bytes([icmp[6], icmp[7]]);
    reply_seq == sequence && (!check_identifier || reply_id == identifier)
}

/// Build a 64 byte echo request: 8 byte header plus a timestamp payload.
fn build_echo_request(request_type: u8, identifier: u16, sequence: u16, with_checksum: bool) -> Vec<u8> {
    let mut packet = vec![0u8; 64];

    packet[0] = request_type;
    packet[1] = 0;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;
    packet[8..16].copy_from_slice(&timestamp.to_be_bytes());

    if with_checksum {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match *pair {
            [hi, lo] => u32::from(u16::from_be_bytes([hi, lo])),
            [hi] => u32::from(hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Run ping via command execution (fallback).
async fn run_ping_command(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let timeout_secs = timeout.as_secs().max(1);

    let mut command = Command::new("ping");
    command
        .args(["-c", "1", "-W", &timeout_secs.to_string(), address])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // ping's own -W bounds the wait; the outer limit only covers a stuck process
    let output = tokio::time::timeout(timeout + Duration::from_secs(1), command.output())
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("timeout")
            || stdout.contains("100% packet loss")
            || stdout.contains("100.0% packet loss")
        {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Command(format!("ping failed: {}{}", stdout, stderr)));
    }

    parse_ping_output(&stdout)
}

/// Parse ping command output for the round trip.
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    // Per-packet line: "time=12.3 ms" (also "time<1 ms" on some systems)
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    let per_packet = PER_PACKET
        .get_or_init(|| Regex::new(r"time[=<](?P<ms>[0-9.]+)\s*ms").expect("valid ping regex"));

    // Summary line: "rtt min/avg/max/mdev = a/b/c/d ms" (Linux) or
    // "round-trip min/avg/max/stddev = a/b/c/d ms" (macOS)
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(r"(?:rtt|round-trip)\s+min/avg/max/(?:mdev|stddev)\s*=\s*[0-9.]+/(?P<ms>[0-9.]+)/")
            .expect("valid ping regex")
    });

    [per_packet, summary]
        .iter()
        .filter_map(|re| re.captures(output))
        .filter_map(|caps| caps.name("ms")?.as_str().parse::<f64>().ok())
        .find(|ms| ms.is_finite() && *ms >= 0.0)
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}
