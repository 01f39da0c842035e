//! Aurora Monitor - fleet reachability and latency watchdog.
//!
//! Probes every configured target on an interval, tracks a rolling latency
//! window per target, and raises deduplicated alerts for outages, latency
//! anomalies and fleet-wide failures.

mod alert;
mod config;
mod monitor;
mod probe;
mod web;

use alert::{alert_channel, run_alert_dispatcher, AlertSink, LogSink, WebhookSink};
use config::MonitorConfig;
use monitor::{shutdown_channel, MonitorEngine};
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const ALERT_QUEUE_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("aurora_monitor=info".parse()?))
        .init();

    let cfg = MonitorConfig::load().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        e
    })?;
    tracing::info!("Aurora Monitor starting with {} targets", cfg.targets.len());
    tracing::info!(
        "Probe: {} (timeout {:?}), interval {:?}, retries {}",
        cfg.probe_kind,
        cfg.probe_timeout,
        cfg.ping_interval,
        cfg.retry_attempts
    );

    let sink: Arc<dyn AlertSink> = match &cfg.webhook_url {
        Some(url) => {
            tracing::info!("Alerts: webhook configured");
            Arc::new(WebhookSink::new(url)?)
        }
        None => {
            tracing::warn!("Alerts: DISCORD_WEBHOOK_URL not set, alerts go to the log only");
            Arc::new(LogSink)
        }
    };

    let (alert_tx, alert_rx) = alert_channel(ALERT_QUEUE_CAPACITY);
    let dispatcher = tokio::spawn(run_alert_dispatcher(alert_rx, sink));

    let backend = probe::backend_for(cfg.probe_kind, &cfg.dns_query_name);
    let engine = MonitorEngine::new(&cfg, backend, alert_tx);
    let (trigger, shutdown) = shutdown_channel();

    let monitors = engine.start(&shutdown).await;

    let server = if cfg.http_port != 0 {
        let server = Server::new(cfg.http_port, engine.fleet());
        let shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.start(shutdown).await {
                tracing::error!("Reporting API failed: {}", e);
            }
        }))
    } else {
        None
    };

    tracing::info!("Monitoring started, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested...");
    trigger.trigger();

    for handle in monitors {
        if let Err(e) = handle.await {
            tracing::error!("Monitor task failed: {}", e);
        }
    }
    if let Some(server) = server {
        if let Err(e) = server.await {
            tracing::error!("Reporting API task failed: {}", e);
        }
    }

    // Every sender is gone once the engine is dropped; the dispatcher drains and exits
    drop(engine);
    if let Err(e) = dispatcher.await {
        tracing::error!("Alert dispatcher task failed: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
