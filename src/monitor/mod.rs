//! Monitoring engine: per-target monitors plus the fleet health check.

mod anomaly;
mod fleet;
mod history;
mod state;
mod target;

pub use anomaly::*;
pub use fleet::*;
pub use history::*;
pub use state::*;
pub use target::*;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::alert::{AlertEvent, AlertSender};
use crate::config::MonitorConfig;
use crate::probe::{ProbeBackend, Prober};

/// Sending half of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Cooperative shutdown flag observed by every loop.
///
/// Dropping the trigger without firing it also counts as shutdown.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `period`. Returns true if shutdown cut the sleep short.
    pub async fn sleep(&mut self, period: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(period) => false,
            _ = self.requested() => true,
        }
    }

    /// Resolve once shutdown is requested.
    pub async fn requested(&mut self) {
        let _ = self.rx.wait_for(|stop| *stop).await;
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Owns the fleet state and starts every monitoring task.
pub struct MonitorEngine {
    fleet: Arc<Fleet>,
    prober: Prober,
    interval: Duration,
    retry_attempts: u32,
    anomaly_threshold_percent: f64,
    anomaly_count: u32,
    failure_percentage: f64,
    alerts: AlertSender,
}

impl MonitorEngine {
    pub fn new(config: &MonitorConfig, backend: Arc<dyn ProbeBackend>, alerts: AlertSender) -> Self {
        let fleet = Fleet::new(
            config
                .targets
                .iter()
                .map(|host| Target::new(host.clone(), config.probe_kind)),
        );

        Self {
            fleet: Arc::new(fleet),
            prober: Prober::new(backend, config.probe_timeout),
            interval: config.ping_interval,
            retry_attempts: config.retry_attempts,
            anomaly_threshold_percent: config.anomaly_threshold_percent,
            anomaly_count: config.anomaly_count,
            failure_percentage: config.failure_percentage,
            alerts,
        }
    }

    pub fn fleet(&self) -> Arc<Fleet> {
        self.fleet.clone()
    }

    /// Spawn one monitor per target and the fleet check, then queue the
    /// startup notice.
    pub async fn start(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        tracing::info!(
            "Starting monitors for {} targets (interval {:?}, {} attempts)",
            self.fleet.len(),
            self.interval,
            self.retry_attempts
        );
        if self.fleet.is_empty() {
            tracing::warn!("No targets configured; fleet health check will be idle");
        }

        let mut handles = Vec::with_capacity(self.fleet.len() + 1);

        for cell in self.fleet.cells() {
            let monitor = TargetMonitor::new(
                cell.clone(),
                self.prober.clone(),
                AnomalyDetector::new(self.anomaly_threshold_percent, self.anomaly_count),
                self.retry_attempts,
                self.interval,
                self.alerts.clone(),
            );
            handles.push(tokio::spawn(monitor.run(shutdown.clone())));
        }

        let fleet_monitor =
            FleetHealthMonitor::new(self.fleet.clone(), self.failure_percentage, self.alerts.clone());
        handles.push(tokio::spawn(fleet_monitor.run(shutdown.clone())));

        let startup = AlertEvent::Startup {
            target_count: self.fleet.len(),
            interval_secs: self.interval.as_secs(),
        };
        if let Err(e) = self.alerts.send(startup).await {
            tracing::error!("Failed to queue startup notice: {}", e);
        }

        handles
    }
}
