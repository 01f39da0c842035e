//! Per-target monitor: probe, record, detect, and alert on transitions.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use super::{AnomalyDetector, Shutdown, TargetCell};
use crate::alert::{AlertError, AlertEvent, AlertSender};
use crate::probe::{ProbeSummary, Prober};

/// Error from one monitoring cycle; logged at the loop boundary.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("failed to queue alert: {0}")]
    Alert(#[from] AlertError),
}

/// Drives one target for the lifetime of the process.
pub struct TargetMonitor {
    cell: Arc<TargetCell>,
    prober: Prober,
    detector: AnomalyDetector,
    retry_attempts: u32,
    interval: Duration,
    alerts: AlertSender,
}

impl TargetMonitor {
    pub fn new(
        cell: Arc<TargetCell>,
        prober: Prober,
        detector: AnomalyDetector,
        retry_attempts: u32,
        interval: Duration,
        alerts: AlertSender,
    ) -> Self {
        Self {
            cell,
            prober,
            detector,
            retry_attempts,
            interval,
            alerts,
        }
    }

    /// Run cycles until shutdown is requested.
    ///
    /// A probe already in flight finishes before shutdown is noticed; the
    /// pause between cycles is cut short.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        let host = self.cell.target().host.clone();
        tracing::info!("Monitoring {} every {:?}", host, self.interval);

        loop {
            if shutdown.is_requested() {
                break;
            }

            if let Err(e) = self.run_cycle().await {
                tracing::error!("Error monitoring {}: {}", host, e);
            }

            if shutdown.sleep(self.interval).await {
                break;
            }
        }

        tracing::info!("Stopped monitoring {}", host);
    }

    /// Probe once, update state, and queue the resulting alerts.
    pub async fn run_cycle(&mut self) -> Result<(), MonitorError> {
        let target = self.cell.target();
        let summary = self
            .prober
            .probe_with_retry(&target.host, self.retry_attempts)
            .await;

        let events = self.observe(summary).await;

        // Queue every event even if one fails; report the first failure.
        let mut first_error = None;
        for event in events {
            if let Err(e) = self.alerts.send(event).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Apply one cycle's outcome to the target state.
    async fn observe(&mut self, summary: ProbeSummary) -> Vec<AlertEvent> {
        let target = self.cell.target().clone();
        let mut events = Vec::new();

        match summary.average_latency_ms {
            Some(latency_ms) => {
                let verdict = self.cell.record_sample(latency_ms, &mut self.detector).await;

                if let (true, Some(rolling_mean_ms)) = (verdict.is_anomaly, verdict.rolling_mean_ms) {
                    tracing::warn!(
                        "[{}] {}: latency anomaly {:.2}ms (mean {:.2}ms)",
                        target.kind,
                        target.host,
                        latency_ms,
                        rolling_mean_ms
                    );
                    events.push(AlertEvent::Anomaly {
                        target: target.host.clone(),
                        kind: target.kind,
                        current_latency_ms: latency_ms,
                        rolling_mean_ms,
                        consecutive_count: self.detector.required_count(),
                    });
                } else if self.detector.consecutive() > 0 {
                    tracing::debug!(
                        "[{}] {}: slow sample {}/{}",
                        target.kind,
                        target.host,
                        self.detector.consecutive(),
                        self.detector.required_count()
                    );
                }

                if self.cell.set_down(false) {
                    tracing::info!("[{}] {}: recovered", target.kind, target.host);
                    events.push(AlertEvent::TargetRecovered {
                        target: target.host.clone(),
                        kind: target.kind,
                        latency_ms,
                    });
                }

                tracing::info!("[{}] {}: {:.2}ms (OK)", target.kind, target.host, latency_ms);
            }
            None => {
                if !self.cell.set_down(true) {
                    events.push(AlertEvent::TargetDown {
                        target: target.host.clone(),
                        kind: target.kind,
                        failed_attempts: summary.failed_attempts,
                    });
                }

                tracing::warn!(
                    "[{}] {}: FAILED ({}/{} attempts)",
                    target.kind,
                    target.host,
                    summary.failed_attempts,
                    summary.attempts
                );
            }
        }

        events
    }
}
