//! Alert events and their delivery.
//!
//! Monitors push [`AlertEvent`]s into a bounded channel; a single dispatcher
//! task drains it into the configured [`AlertSink`]. Delivery failures are
//! logged and dropped so they can never stall or stop a monitor.

mod webhook;

pub use webhook::*;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::probe::ProbeKind;

/// Alert delivery error types.
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook rejected alert with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("alert channel closed")]
    ChannelClosed,
}

/// One notification, with the fields the notification channel renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AlertEvent {
    Startup {
        target_count: usize,
        interval_secs: u64,
    },
    TargetDown {
        target: String,
        #[serde(rename = "type")]
        kind: ProbeKind,
        failed_attempts: u32,
    },
    TargetRecovered {
        target: String,
        #[serde(rename = "type")]
        kind: ProbeKind,
        latency_ms: f64,
    },
    Anomaly {
        target: String,
        #[serde(rename = "type")]
        kind: ProbeKind,
        current_latency_ms: f64,
        rolling_mean_ms: f64,
        consecutive_count: u32,
    },
    Critical {
        failed_count: usize,
        total_count: usize,
        failure_rate_percent: f64,
    },
}

impl fmt::Display for AlertEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertEvent::Startup {
                target_count,
                interval_secs,
            } => write!(
                f,
                "monitor started: {} targets every {}s",
                target_count, interval_secs
            ),
            AlertEvent::TargetDown {
                target,
                kind,
                failed_attempts,
            } => write!(
                f,
                "[{}] {} is unreachable ({} failed attempts)",
                kind, target, failed_attempts
            ),
            AlertEvent::TargetRecovered {
                target,
                kind,
                latency_ms,
            } => write!(f, "[{}] {} recovered ({:.2}ms)", kind, target, latency_ms),
            AlertEvent::Anomaly {
                target,
                kind,
                current_latency_ms,
                rolling_mean_ms,
                consecutive_count,
            } => write!(
                f,
                "[{}] {} latency anomaly: {:.2}ms vs mean {:.2}ms ({} consecutive)",
                kind, target, current_latency_ms, rolling_mean_ms, consecutive_count
            ),
            AlertEvent::Critical {
                failed_count,
                total_count,
                failure_rate_percent,
            } => write!(
                f,
                "CRITICAL: {}/{} targets down ({:.1}%)",
                failed_count, total_count, failure_rate_percent
            ),
        }
    }
}

/// Destination for alert events.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, event: &AlertEvent) -> Result<(), AlertError>;
}

/// Sink that only writes alerts to the log.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn deliver(&self, event: &AlertEvent) -> Result<(), AlertError> {
        match event {
            AlertEvent::Critical { .. } => tracing::error!("ALERT {}", event),
            AlertEvent::TargetDown { .. } | AlertEvent::Anomaly { .. } => {
                tracing::warn!("ALERT {}", event)
            }
            AlertEvent::Startup { .. } | AlertEvent::TargetRecovered { .. } => {
                tracing::info!("ALERT {}", event)
            }
        }
        Ok(())
    }
}

/// Producer half of the alert channel, cloned into every monitor task.
#[derive(Debug, Clone)]
pub struct AlertSender {
    tx: mpsc::Sender<AlertEvent>,
}

impl AlertSender {
    /// Queue an event for delivery.
    pub async fn send(&self, event: AlertEvent) -> Result<(), AlertError> {
        self.tx.send(event).await.map_err(|_| AlertError::ChannelClosed)
    }
}

/// Create the alert channel.
pub fn alert_channel(capacity: usize) -> (AlertSender, mpsc::Receiver<AlertEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (AlertSender { tx }, rx)
}

/// Deliver queued alerts until every sender is gone.
pub async fn run_alert_dispatcher(mut rx: mpsc::Receiver<AlertEvent>, sink: Arc<dyn AlertSink>) {
    while let Some(event) = rx.recv().await {
        if let Err(e) = sink.deliver(&event).await {
            tracing::error!("Failed to deliver alert ({}): {}", event, e);
        }
    }
    tracing::info!("Alert dispatcher stopped");
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    /// Drain everything currently queued on the alert channel.
    pub fn drain(rx: &mut mpsc::Receiver<AlertEvent>) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return events,
            }
        }
    }
}
