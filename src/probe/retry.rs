//! Retrying prober: several sequential attempts folded into one outcome.

use std::sync::Arc;
use std::time::Duration;

use super::{ProbeBackend, ProbeError};

/// Pause between consecutive attempts of one cycle.
pub const RETRY_DELAY: Duration = Duration::from_millis(500);

/// Outcome of one probe cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeSummary {
    /// Mean round trip of the successful attempts, `None` when all failed
    pub average_latency_ms: Option<f64>,
    pub failed_attempts: u32,
    pub attempts: u32,
}

/// Runs a backend with bounded retries.
#[derive(Clone)]
pub struct Prober {
    backend: Arc<dyn ProbeBackend>,
    timeout: Duration,
}

impl Prober {
    pub fn new(backend: Arc<dyn ProbeBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Probe `host` up to `attempts` times, one after another.
    ///
    /// Each attempt is cut off at the timeout, whatever the backend does.
    /// A failed attempt is logged and counted, never propagated. The pause
    /// only happens between attempts, not after the last one.
    pub async fn probe_with_retry(&self, host: &str, attempts: u32) -> ProbeSummary {
        let mut failed_attempts = 0;
        let mut total_ms = 0.0;
        let mut successes = 0u32;

        for attempt in 0..attempts {
            let outcome = tokio::time::timeout(self.timeout, self.backend.probe(host, self.timeout))
                .await
                .unwrap_or(Err(ProbeError::Timeout(self.timeout)));

            match outcome {
                Ok(rtt) => {
                    total_ms += rtt.as_secs_f64() * 1000.0;
                    successes += 1;
                }
                Err(e) => {
                    failed_attempts += 1;
                    match e {
                        ProbeError::Timeout(_) => tracing::debug!(
                            "Probe attempt {}/{} for {}: {}",
                            attempt + 1,
                            attempts,
                            host,
                            e
                        ),
                        _ => tracing::warn!(
                            "Probe attempt {}/{} for {}: {}",
                            attempt + 1,
                            attempts,
                            host,
                            e
                        ),
                    }
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        ProbeSummary {
            average_latency_ms: (successes > 0).then(|| total_ms / f64::from(successes)),
            failed_attempts,
            attempts,
        }
    }
}
