//! Configuration module for Aurora Monitor.
//!
//! Loads configuration from environment variables (and an optional `.env`
//! file) with the defaults of the production deployment. Every value is
//! validated up front; a bad value aborts startup.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::probe::ProbeKind;

/// Configuration error raised at startup.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &'static str, value: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Hosts to probe (`PING_TARGETS`, `;`-separated)
    pub targets: Vec<String>,
    /// Seconds between probe cycles of one target (default: 5)
    pub ping_interval: Duration,
    /// Probe attempts per cycle (default: 3)
    pub retry_attempts: u32,
    /// Percent above the rolling mean that counts as anomalous (default: 30)
    pub anomaly_threshold_percent: f64,
    /// Consecutive anomalous samples before alerting (default: 5)
    pub anomaly_count: u32,
    /// Fleet failure percent that raises the critical alert (default: 50)
    pub failure_percentage: f64,
    /// Per-attempt probe timeout (default: 2s)
    pub probe_timeout: Duration,
    /// Probe backend used for every target (default: ICMP)
    pub probe_kind: ProbeKind,
    /// Name queried by the DNS backend (default: "example.com")
    pub dns_query_name: String,
    /// Discord-compatible webhook for alerts; alerts are only logged when absent
    pub webhook_url: Option<String>,
    /// Port for the reporting API, 0 disables it (default: 8080)
    pub http_port: u16,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            ping_interval: Duration::from_secs(5),
            retry_attempts: 3,
            anomaly_threshold_percent: 30.0,
            anomaly_count: 5,
            failure_percentage: 50.0,
            probe_timeout: Duration::from_secs(2),
            probe_kind: ProbeKind::Icmp,
            dns_query_name: "example.com".to_string(),
            webhook_url: None,
            http_port: 8080,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from the process environment.
    ///
    /// A `.env` file in the working directory is read first; variables
    /// already set in the environment take precedence.
    pub fn load() -> Result<Self, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment overrides from {}", path.display());
        }
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// Environment variables:
    /// - `PING_TARGETS`: hosts separated by `;`
    /// - `PING_INTERVAL`: seconds between cycles
    /// - `RETRY_ATTEMPTS`: attempts per cycle
    /// - `ANOMALY_THRESHOLD`: percent over the rolling mean
    /// - `ANOMALY_COUNT`: consecutive anomalies before alerting
    /// - `FAILURE_PERCENTAGE`: fleet failure percent for the critical alert
    /// - `PROBE_TIMEOUT`: seconds per attempt
    /// - `PROBE_TYPE`: `icmp` or `dns`
    /// - `DNS_QUERY_NAME`: name resolved by the DNS backend
    /// - `DISCORD_WEBHOOK_URL`: alert webhook
    /// - `HTTP_PORT`: reporting API port
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(raw) = lookup("PING_TARGETS") {
            cfg.targets = parse_targets(&raw);
        }

        if let Some(raw) = lookup("PING_INTERVAL") {
            let secs: u64 = parse_number("PING_INTERVAL", &raw)?;
            if secs < 1 {
                return Err(ConfigError::invalid("PING_INTERVAL", &raw, "must be at least 1"));
            }
            cfg.ping_interval = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup("RETRY_ATTEMPTS") {
            cfg.retry_attempts = parse_number("RETRY_ATTEMPTS", &raw)?;
            if cfg.retry_attempts < 1 {
                return Err(ConfigError::invalid("RETRY_ATTEMPTS", &raw, "must be at least 1"));
            }
        }

        if let Some(raw) = lookup("ANOMALY_THRESHOLD") {
            let pct: f64 = parse_number("ANOMALY_THRESHOLD", &raw)?;
            if !pct.is_finite() || pct < 0.0 {
                return Err(ConfigError::invalid(
                    "ANOMALY_THRESHOLD",
                    &raw,
                    "must be a non-negative percentage",
                ));
            }
            cfg.anomaly_threshold_percent = pct;
        }

        if let Some(raw) = lookup("ANOMALY_COUNT") {
            cfg.anomaly_count = parse_number("ANOMALY_COUNT", &raw)?;
            if cfg.anomaly_count < 1 {
                return Err(ConfigError::invalid("ANOMALY_COUNT", &raw, "must be at least 1"));
            }
        }

        if let Some(raw) = lookup("FAILURE_PERCENTAGE") {
            let pct: f64 = parse_number("FAILURE_PERCENTAGE", &raw)?;
            if !pct.is_finite() || pct <= 0.0 || pct > 100.0 {
                return Err(ConfigError::invalid(
                    "FAILURE_PERCENTAGE",
                    &raw,
                    "must be in (0, 100]",
                ));
            }
            cfg.failure_percentage = pct;
        }

        if let Some(raw) = lookup("PROBE_TIMEOUT") {
            let secs: f64 = parse_number("PROBE_TIMEOUT", &raw)?;
            if !secs.is_finite() || secs <= 0.0 {
                return Err(ConfigError::invalid("PROBE_TIMEOUT", &raw, "must be positive"));
            }
            cfg.probe_timeout = Duration::from_secs_f64(secs);
        }

        if let Some(raw) = lookup("PROBE_TYPE") {
            cfg.probe_kind = raw
                .parse()
                .map_err(|e: String| ConfigError::invalid("PROBE_TYPE", &raw, e))?;
        }

        if let Some(raw) = lookup("DNS_QUERY_NAME") {
            let name = raw.trim().trim_end_matches('.');
            if name.is_empty() || name.split('.').any(|l| l.is_empty() || l.len() > 63) {
                return Err(ConfigError::invalid(
                    "DNS_QUERY_NAME",
                    &raw,
                    "not a valid domain name",
                ));
            }
            cfg.dns_query_name = name.to_string();
        }

        cfg.webhook_url = lookup("DISCORD_WEBHOOK_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());

        if let Some(raw) = lookup("HTTP_PORT") {
            cfg.http_port = parse_number("HTTP_PORT", &raw)?;
        }

        Ok(cfg)
    }
}

/// Split a `;`-separated target list, dropping blank entries.
fn parse_targets(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_number<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::invalid(key, raw, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<MonitorConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        MonitorConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = load(&[]).unwrap();
        assert!(cfg.targets.is_empty());
        assert_eq!(cfg.ping_interval, Duration::from_secs(5));
        assert_eq!(cfg.retry_attempts, 3);
        assert_eq!(cfg.anomaly_threshold_percent, 30.0);
        assert_eq!(cfg.anomaly_count, 5);
        assert_eq!(cfg.failure_percentage, 50.0);
        assert_eq!(cfg.probe_timeout, Duration::from_secs(2));
        assert_eq!(cfg.probe_kind, ProbeKind::Icmp);
        assert_eq!(cfg.webhook_url, None);
        assert_eq!(cfg.http_port, 8080);
    }

    #[test]
    fn test_targets_are_trimmed_and_blanks_dropped() {
        let cfg = load(&[("PING_TARGETS", " 8.8.8.8 ;;1.1.1.1; ; example.org")]).unwrap();
        assert_eq!(cfg.targets, vec!["8.8.8.8", "1.1.1.1", "example.org"]);
    }

    #[test]
    fn test_overrides() {
        let cfg = load(&[
            ("PING_INTERVAL", "10"),
            ("RETRY_ATTEMPTS", "5"),
            ("ANOMALY_THRESHOLD", "12.5"),
            ("ANOMALY_COUNT", "2"),
            ("FAILURE_PERCENTAGE", "75"),
            ("PROBE_TIMEOUT", "0.5"),
            ("PROBE_TYPE", "DNS"),
            ("DNS_QUERY_NAME", "cloudflare.com."),
            ("DISCORD_WEBHOOK_URL", " https://discord.test/api/webhooks/1/x "),
            ("HTTP_PORT", "0"),
        ])
        .unwrap();
        assert_eq!(cfg.ping_interval, Duration::from_secs(10));
        assert_eq!(cfg.retry_attempts, 5);
        assert_eq!(cfg.anomaly_threshold_percent, 12.5);
        assert_eq!(cfg.anomaly_count, 2);
        assert_eq!(cfg.failure_percentage, 75.0);
        assert_eq!(cfg.probe_timeout, Duration::from_millis(500));
        assert_eq!(cfg.probe_kind, ProbeKind::Dns);
        assert_eq!(cfg.dns_query_name, "cloudflare.com");
        assert_eq!(
            cfg.webhook_url.as_deref(),
            Some("https://discord.test/api/webhooks/1/x")
        );
        assert_eq!(cfg.http_port, 0);
    }

    #[test]
    fn test_blank_webhook_is_ignored() {
        let cfg = load(&[("DISCORD_WEBHOOK_URL", "  ")]).unwrap();
        assert_eq!(cfg.webhook_url, None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases = [
            ("PING_INTERVAL", "fast"),
            ("PING_INTERVAL", "0"),
            ("RETRY_ATTEMPTS", "0"),
            ("RETRY_ATTEMPTS", "-1"),
            ("ANOMALY_THRESHOLD", "-5"),
            ("ANOMALY_COUNT", "0"),
            ("FAILURE_PERCENTAGE", "0"),
            ("FAILURE_PERCENTAGE", "150"),
            ("PROBE_TIMEOUT", "0"),
            ("PROBE_TYPE", "http"),
            ("DNS_QUERY_NAME", "bad..name"),
            ("HTTP_PORT", "70000"),
        ];

        for (key, value) in cases {
            match load(&[(key, value)]) {
                Err(ConfigError::Invalid { key: k, .. }) => assert_eq!(k, key),
                Ok(_) => panic!("{}={} should be rejected", key, value),
            }
        }
    }
}
