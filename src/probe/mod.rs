//! Probe module for reachability checks.
//!
//! Supports ICMP echo and DNS query backends behind the [`ProbeBackend`]
//! capability, plus the retrying [`Prober`] used by the monitors.

mod dns;
mod ping;
mod retry;

pub use dns::*;
pub use ping::*;
pub use retry::*;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
}

/// Kind of probe run against a target, shown as the target's type tag in alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeKind {
    #[serde(rename = "ICMP")]
    Icmp,
    #[serde(rename = "DNS")]
    Dns,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeKind::Icmp => f.write_str("ICMP"),
            ProbeKind::Dns => f.write_str("DNS"),
        }
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "icmp" | "ping" => Ok(ProbeKind::Icmp),
            "dns" => Ok(ProbeKind::Dns),
            other => Err(format!("unknown probe type: {}", other)),
        }
    }
}

/// A single reachability check against a host.
///
/// Ordinary network failures (timeouts, unreachable hosts, resolution or
/// permission errors) come back as `Err`; they are never panics.
#[async_trait]
pub trait ProbeBackend: Send + Sync {
    /// Probe `host` once, returning the measured round trip.
    async fn probe(&self, host: &str, timeout: Duration) -> Result<Duration, ProbeError>;
}

/// Build the backend selected for this process.
pub fn backend_for(kind: ProbeKind, dns_query_name: &str) -> Arc<dyn ProbeBackend> {
    match kind {
        ProbeKind::Icmp => Arc::new(IcmpBackend::new()),
        ProbeKind::Dns => Arc::new(DnsBackend::new(dns_query_name)),
    }
}

/// Reject replies that only arrived after the deadline.
fn enforce_timeout(rtt: Duration, timeout: Duration) -> Result<Duration, ProbeError> {
    if rtt >= timeout {
        Err(ProbeError::Timeout(timeout))
    } else {
        Ok(rtt)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Scripted reply for one attempt.
    #[derive(Debug, Clone, Copy)]
    pub enum Reply {
        Ok(f64),
        Timeout,
        Fail,
    }

    /// Backend that replays scripted replies per host, then a fallback.
    pub struct ScriptedBackend {
        scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
        fallback: Reply,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedBackend {
        pub fn new(fallback: Reply) -> Self {
            Self {
                scripts: Mutex::new(HashMap::new()),
                fallback,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn push(&self, host: &str, replies: impl IntoIterator<Item = Reply>) {
            self.scripts
                .lock()
                .unwrap()
                .entry(host.to_string())
                .or_default()
                .extend(replies);
        }

        pub fn calls(&self, host: &str) -> usize {
            self.calls.lock().unwrap().iter().filter(|h| *h == host).count()
        }
    }

    #[async_trait]
    impl ProbeBackend for ScriptedBackend {
        async fn probe(&self, host: &str, timeout: Duration) -> Result<Duration, ProbeError> {
            self.calls.lock().unwrap().push(host.to_string());
            let reply = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(host)
                .and_then(VecDeque::pop_front)
                .unwrap_or(self.fallback);
            match reply {
                Reply::Ok(ms) => Ok(Duration::from_secs_f64(ms / 1000.0)),
                Reply::Timeout => Err(ProbeError::Timeout(timeout)),
                Reply::Fail => Err(ProbeError::Network("host unreachable".to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_kind_parse_and_display() {
        assert_eq!("icmp".parse::<ProbeKind>().unwrap(), ProbeKind::Icmp);
        assert_eq!(" Ping ".parse::<ProbeKind>().unwrap(), ProbeKind::Icmp);
        assert_eq!("DNS".parse::<ProbeKind>().unwrap(), ProbeKind::Dns);
        assert!("http".parse::<ProbeKind>().is_err());
        assert_eq!(ProbeKind::Icmp.to_string(), "ICMP");
        assert_eq!(ProbeKind::Dns.to_string(), "DNS");
    }

    #[test]
    fn test_enforce_timeout() {
        let timeout = Duration::from_secs(2);
        assert!(enforce_timeout(Duration::from_millis(1999), timeout).is_ok());
        assert!(matches!(
            enforce_timeout(Duration::from_secs(2), timeout),
            Err(ProbeError::Timeout(_))
        ));
    }
}
