//! Discord-compatible webhook sink.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{AlertError, AlertEvent, AlertSink};

const COLOR_INFO: u32 = 0x00BFFF;
const COLOR_DOWN: u32 = 0xFFFF99;
const COLOR_RECOVERED: u32 = 0x00FF00;
const COLOR_ANOMALY: u32 = 0xFFA500;
const COLOR_CRITICAL: u32 = 0xFF0000;

/// Posts each alert as a single embed to a webhook URL.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: &str) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait]
impl AlertSink for WebhookSink {
    async fn deliver(&self, event: &AlertEvent) -> Result<(), AlertError> {
        let payload = WebhookPayload {
            embeds: vec![Embed::from_event(event, Utc::now())],
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AlertError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload {
    embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    description: String,
    color: u32,
    fields: Vec<EmbedField>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: &'static str,
    value: String,
    inline: bool,
}

fn field(name: &'static str, value: impl ToString) -> EmbedField {
    EmbedField {
        name,
        value: value.to_string(),
        inline: true,
    }
}

impl Embed {
    fn from_event(event: &AlertEvent, timestamp: DateTime<Utc>) -> Self {
        let (title, description, color, fields) = match event {
            AlertEvent::Startup {
                target_count,
                interval_secs,
            } => (
                "🚀 Monitor Started".to_string(),
                "Connectivity monitoring is running".to_string(),
                COLOR_INFO,
                vec![
                    field("Targets", target_count),
                    field("Interval", format!("{}s", interval_secs)),
                ],
            ),
            AlertEvent::TargetDown {
                target,
                kind,
                failed_attempts,
            } => (
                "⚠️ Connection Lost".to_string(),
                format!("Could not reach **{}**", target),
                COLOR_DOWN,
                vec![
                    field("Target", target),
                    field("Type", kind),
                    field("Failed Attempts", failed_attempts),
                ],
            ),
            AlertEvent::TargetRecovered {
                target,
                kind,
                latency_ms,
            } => (
                "✅ Connection Restored".to_string(),
                format!("Connection to **{}** is back", target),
                COLOR_RECOVERED,
                vec![
                    field("Target", target),
                    field("Type", kind),
                    field("Latency", format!("{:.2}ms", latency_ms)),
                ],
            ),
            AlertEvent::Anomaly {
                target,
                kind,
                current_latency_ms,
                rolling_mean_ms,
                consecutive_count,
            } => (
                "⚠️ Latency Anomaly Detected".to_string(),
                format!("High latency on the connection to **{}**", target),
                COLOR_ANOMALY,
                vec![
                    field("Target", target),
                    field("Type", kind),
                    field("Current Latency", format!("{:.2}ms", current_latency_ms)),
                    field("Average Latency", format!("{:.2}ms", rolling_mean_ms)),
                    field("Consecutive Anomalies", consecutive_count),
                ],
            ),
            AlertEvent::Critical {
                failed_count,
                total_count,
                failure_rate_percent,
            } => (
                "🚨 CRITICAL: Multiple Connections Lost".to_string(),
                format!(
                    "**{:.1}%** of monitored connections are unavailable!",
                    failure_rate_percent
                ),
                COLOR_CRITICAL,
                vec![
                    field("Connections Lost", failed_count),
                    field("Total Monitored", total_count),
                    field("Failure Rate", format!("{:.1}%", failure_rate_percent)),
                ],
            ),
        };

        Self {
            title,
            description,
            color,
            fields,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeKind;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[test]
    fn test_anomaly_embed() {
        let event = AlertEvent::Anomaly {
            target: "8.8.8.8".to_string(),
            kind: ProbeKind::Icmp,
            current_latency_ms: 40.0,
            rolling_mean_ms: 26.666,
            consecutive_count: 5,
        };
        let embed = Embed::from_event(&event, Utc::now());
        assert_eq!(embed.color, COLOR_ANOMALY);
        let values: Vec<_> = embed.fields.iter().map(|f| f.value.as_str()).collect();
        assert_eq!(values, vec!["8.8.8.8", "ICMP", "40.00ms", "26.67ms", "5"]);
    }

    #[test]
    fn test_critical_embed() {
        let event = AlertEvent::Critical {
            failed_count: 2,
            total_count: 4,
            failure_rate_percent: 50.0,
        };
        let embed = Embed::from_event(&event, Utc::now());
        assert_eq!(embed.color, COLOR_CRITICAL);
        assert!(embed.description.contains("50.0%"));
        assert_eq!(embed.fields[2].value, "50.0%");
    }

    #[derive(Clone, Default)]
    struct Received {
        bodies: Arc<Mutex<Vec<serde_json::Value>>>,
        status: Option<StatusCode>,
    }

    async fn hook(State(state): State<Received>, Json(body): Json<serde_json::Value>) -> StatusCode {
        state.bodies.lock().await.push(body);
        state.status.unwrap_or(StatusCode::NO_CONTENT)
    }

    async fn serve(state: Received) -> String {
        let app = Router::new().route("/hook", post(hook)).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}/hook", addr)
    }

    #[tokio::test]
    async fn test_webhook_delivery() {
        let received = Received::default();
        let url = serve(received.clone()).await;

        let sink = WebhookSink::new(&url).unwrap();
        sink.deliver(&AlertEvent::Startup {
            target_count: 3,
            interval_secs: 5,
        })
        .await
        .unwrap();

        let bodies = received.bodies.lock().await;
        assert_eq!(bodies.len(), 1);
        let embed = &bodies[0]["embeds"][0];
        assert_eq!(embed["color"], COLOR_INFO);
        assert_eq!(embed["fields"][0]["value"], "3");
        assert_eq!(embed["fields"][1]["value"], "5s");
    }

    #[tokio::test]
    async fn test_webhook_rejection_is_an_error() {
        let received = Received {
            status: Some(StatusCode::TOO_MANY_REQUESTS),
            ..Default::default()
        };
        let url = serve(received).await;

        let sink = WebhookSink::new(&url).unwrap();
        let result = sink
            .deliver(&AlertEvent::Startup {
                target_count: 1,
                interval_secs: 5,
            })
            .await;
        assert!(matches!(result, Err(AlertError::Rejected { status: 429, .. })));
    }
}
