//! Shared per-target state and the statistics view over it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Serialize, Serializer};
use tokio::sync::RwLock;

use super::{AnomalyDetector, AnomalyVerdict, LatencyHistory};
use crate::probe::ProbeKind;

/// A configured monitoring target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub host: String,
    pub kind: ProbeKind,
}

impl Target {
    pub fn new(host: impl Into<String>, kind: ProbeKind) -> Self {
        Self {
            host: host.into(),
            kind,
        }
    }
}

#[derive(Debug, Default)]
struct Samples {
    history: LatencyHistory,
    latest_ms: Option<f64>,
}

/// State cell for one target.
///
/// Only the target's own monitor writes it; the fleet check and the
/// reporting API read it concurrently.
#[derive(Debug)]
pub struct TargetCell {
    target: Target,
    down: AtomicBool,
    samples: RwLock<Samples>,
}

impl TargetCell {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            down: AtomicBool::new(false),
            samples: RwLock::new(Samples::default()),
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn is_down(&self) -> bool {
        self.down.load(Ordering::Acquire)
    }

    /// Set the availability flag, returning the previous value.
    pub(crate) fn set_down(&self, down: bool) -> bool {
        self.down.swap(down, Ordering::AcqRel)
    }

    /// Record a successful sample and judge it against the updated window.
    pub(crate) async fn record_sample(
        &self,
        latency_ms: f64,
        detector: &mut AnomalyDetector,
    ) -> AnomalyVerdict {
        let mut samples = self.samples.write().await;
        samples.history.record(latency_ms);
        samples.latest_ms = Some(latency_ms);
        detector.evaluate(latency_ms, &samples.history)
    }

    pub async fn statistics(&self) -> TargetStatistics {
        let samples = self.samples.read().await;
        TargetStatistics {
            target: self.target.host.clone(),
            kind: self.target.kind,
            status: if self.is_down() {
                TargetStatus::Offline
            } else {
                TargetStatus::Online
            },
            current_latency_ms: samples.latest_ms,
            rolling_mean_ms: samples.history.mean(),
            min_ms: samples.history.min(),
            max_ms: samples.history.max(),
            samples: samples.history.len(),
        }
    }
}

/// All monitored targets, in configuration order.
#[derive(Debug, Default)]
pub struct Fleet {
    cells: Vec<Arc<TargetCell>>,
}

impl Fleet {
    pub fn new(targets: impl IntoIterator<Item = Target>) -> Self {
        Self {
            cells: targets
                .into_iter()
                .map(|t| Arc::new(TargetCell::new(t)))
                .collect(),
        }
    }

    pub fn cells(&self) -> &[Arc<TargetCell>] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Targets currently flagged down. Not an atomic snapshot across targets.
    pub fn down_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_down()).count()
    }

    /// Read-only report over every target.
    pub async fn statistics(&self) -> Statistics {
        let mut targets = Vec::with_capacity(self.cells.len());
        for cell in &self.cells {
            targets.push(cell.statistics().await);
        }
        let online_count = targets
            .iter()
            .filter(|t| t.status == TargetStatus::Online)
            .count();

        Statistics {
            online_count,
            total_count: targets.len(),
            targets,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetStatus {
    Online,
    Offline,
}

/// Report line for one target. Absent latencies serialize as `0.0`.
#[derive(Debug, Clone, Serialize)]
pub struct TargetStatistics {
    pub target: String,
    #[serde(rename = "type")]
    pub kind: ProbeKind,
    pub status: TargetStatus,
    #[serde(serialize_with = "ms_or_zero")]
    pub current_latency_ms: Option<f64>,
    #[serde(serialize_with = "ms_or_zero")]
    pub rolling_mean_ms: Option<f64>,
    #[serde(serialize_with = "ms_or_zero")]
    pub min_ms: Option<f64>,
    #[serde(serialize_with = "ms_or_zero")]
    pub max_ms: Option<f64>,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub targets: Vec<TargetStatistics>,
    pub online_count: usize,
    pub total_count: usize,
}

fn ms_or_zero<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fleet(hosts: &[&str]) -> Fleet {
        Fleet::new(hosts.iter().map(|h| Target::new(*h, ProbeKind::Icmp)))
    }

    #[tokio::test]
    async fn test_fresh_fleet_is_online_with_no_samples() {
        let fleet = fleet(&["a", "b"]);
        let stats = fleet.statistics().await;
        assert_eq!(stats.online_count, 2);
        assert_eq!(stats.total_count, 2);
        assert_eq!(stats.targets[0].current_latency_ms, None);
        assert_eq!(stats.targets[0].rolling_mean_ms, None);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["targets"][0]["status"], "online");
        assert_eq!(json["targets"][0]["current_latency_ms"], 0.0);
        assert_eq!(json["targets"][1]["type"], "ICMP");
    }

    #[tokio::test]
    async fn test_record_sample_updates_report() {
        let fleet = fleet(&["a"]);
        let cell = &fleet.cells()[0];
        let mut detector = AnomalyDetector::new(30.0, 5);

        for ms in [10.0, 30.0, 20.0] {
            cell.record_sample(ms, &mut detector).await;
        }
        let stats = cell.statistics().await;
        assert_eq!(stats.current_latency_ms, Some(20.0));
        assert_eq!(stats.rolling_mean_ms, Some(20.0));
        assert_eq!(stats.min_ms, Some(10.0));
        assert_eq!(stats.max_ms, Some(30.0));
        assert_eq!(stats.samples, 3);
    }

    #[tokio::test]
    async fn test_down_flag_and_counts() {
        let fleet = fleet(&["a", "b", "c"]);
        assert!(!fleet.cells()[1].set_down(true));
        assert!(fleet.cells()[1].set_down(true));
        assert_eq!(fleet.down_count(), 1);

        let stats = fleet.statistics().await;
        assert_eq!(stats.online_count, 2);
        assert_eq!(stats.targets[1].status, TargetStatus::Offline);

        assert!(fleet.cells()[1].set_down(false));
        assert_eq!(fleet.down_count(), 0);
    }
}
