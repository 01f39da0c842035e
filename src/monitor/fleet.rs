//! Fleet-wide failure alarm.

use std::sync::Arc;
use std::time::Duration;

use super::{Fleet, Shutdown};
use crate::alert::{AlertEvent, AlertSender};

/// How often the fleet failure rate is checked.
pub const FLEET_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Raises one critical alert each time the share of down targets reaches
/// the threshold. Dropping back below re-arms it without any notice.
pub struct FleetHealthMonitor {
    fleet: Arc<Fleet>,
    threshold_percent: f64,
    alert_active: bool,
    alerts: AlertSender,
}

impl FleetHealthMonitor {
    pub fn new(fleet: Arc<Fleet>, threshold_percent: f64, alerts: AlertSender) -> Self {
        Self {
            fleet,
            threshold_percent,
            alert_active: false,
            alerts,
        }
    }

    /// Evaluate the current failure rate, returning an alert on the rising edge.
    pub fn check(&mut self) -> Option<AlertEvent> {
        let total_count = self.fleet.len();
        if total_count == 0 {
            return None;
        }

        let failed_count = self.fleet.down_count();
        let failure_rate_percent = failed_count as f64 / total_count as f64 * 100.0;

        if failure_rate_percent >= self.threshold_percent {
            if self.alert_active {
                return None;
            }
            self.alert_active = true;
            tracing::error!(
                "Fleet failure rate {:.1}% ({}/{}) reached threshold {:.1}%",
                failure_rate_percent,
                failed_count,
                total_count,
                self.threshold_percent
            );
            Some(AlertEvent::Critical {
                failed_count,
                total_count,
                failure_rate_percent,
            })
        } else {
            if self.alert_active {
                tracing::info!(
                    "Fleet failure rate back to {:.1}% ({}/{})",
                    failure_rate_percent,
                    failed_count,
                    total_count
                );
            }
            self.alert_active = false;
            None
        }
    }

    /// Check every [`FLEET_CHECK_INTERVAL`] until shutdown.
    pub async fn run(mut self, mut shutdown: Shutdown) {
        loop {
            if shutdown.sleep(FLEET_CHECK_INTERVAL).await || shutdown.is_requested() {
                break;
            }

            if let Some(event) = self.check() {
                if let Err(e) = self.alerts.send(event).await {
                    tracing::error!("Failed to queue critical alert: {}", e);
                }
            }
        }

        tracing::info!("Fleet health monitor stopped");
    }
}
