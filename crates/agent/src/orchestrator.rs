//! Agent orchestration
//!
//! Wires the collectors, the detection engines and the transport
//! client together, runs one timer-driven task per collection concern
//! and coordinates shutdown. Each task owns its collector; the shared
//! transport client is cloned into every task.

use crate::config::AgentConfig;
use anyhow::Result;
use hostwatch_lib::anomaly::{BaselineDetector, ThreatConfig, ThreatEngine};
use hostwatch_lib::collector::{
    FlowQueue, LogTailer, OverflowPolicy, SecurityCollector, SystemSampler,
};
use hostwatch_lib::models::{AgentIdentity, HostFacts, LogBatch, Severity};
use hostwatch_lib::transport::{
    ClientConfig, SubscribeLedger, TcpTransport, Transport, TransportClient,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

const SECURITY_INTERVAL_SECS: u64 = 60;
const LOG_INTERVAL_SECS: u64 = 30;
const FLOW_QUEUE_CAPACITY: usize = 1024;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Errors included in a log alert, at most
const MAX_ALERT_ERRORS: usize = 10;

pub struct Agent {
    config: AgentConfig,
    client: TransportClient,
    flows: Arc<FlowQueue>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let transport = Arc::new(TcpTransport::new(&config.collector_uri)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Build the agent on an explicit transport (used by tests)
    pub fn with_transport(config: AgentConfig, transport: Arc<dyn Transport>) -> Self {
        let identity = AgentIdentity {
            server_id: config.server_id.clone(),
            channel: config.channel.clone(),
            agent_version: config.agent_version.clone(),
        };

        let client_config = ClientConfig {
            max_retries: config.max_retries,
            ..ClientConfig::default()
        };

        let client = TransportClient::new(transport, client_config, identity, HostFacts::gather());
        let flows = Arc::new(FlowQueue::new(FLOW_QUEUE_CAPACITY, OverflowPolicy::DropOldest));

        Self {
            config,
            client,
            flows,
        }
    }

    /// Queue external capture sources push flow records into
    pub fn flow_queue(&self) -> Arc<FlowQueue> {
        Arc::clone(&self.flows)
    }

    /// Run all collection tasks until `shutdown` fires.
    ///
    /// Connects and performs the one-time subscribe handshake first,
    /// then drives the monitoring, security and log cycles. On
    /// shutdown the tasks are joined with a bounded grace period and
    /// the transport is closed last.
    pub async fn run(&self, shutdown: broadcast::Sender<()>) -> Result<()> {
        info!(
            server_id = %self.config.server_id,
            interval_secs = self.config.monitoring_interval,
            "starting agent"
        );

        // A failed initial connect is not fatal; every publish retries.
        if !self.client.connect().await {
            warn!("initial connection failed, will retry on first publish");
        }

        self.subscribe_once().await;

        let handles = vec![
            tokio::spawn(monitoring_loop(
                self.client.clone(),
                Arc::clone(&self.flows),
                Duration::from_secs(self.config.monitoring_interval),
                shutdown.subscribe(),
            )),
            tokio::spawn(security_loop(
                self.client.clone(),
                Duration::from_secs(SECURITY_INTERVAL_SECS),
                shutdown.subscribe(),
            )),
            tokio::spawn(log_loop(
                self.client.clone(),
                self.config.send_all_logs,
                Duration::from_secs(LOG_INTERVAL_SECS),
                shutdown.subscribe(),
            )),
        ];

        let mut stop = shutdown.subscribe();
        let _ = stop.recv().await;
        info!("shutdown requested, stopping collection tasks");

        for handle in handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("collection task did not stop within the grace period");
            }
        }

        self.client.close().await;
        info!("agent stopped");
        Ok(())
    }

    /// Send the identification handshake exactly once per install
    async fn subscribe_once(&self) {
        let path = Path::new(&self.config.state_dir).join("subscription.json");
        let mut ledger = SubscribeLedger::open(path);

        if ledger.is_subscribed() {
            debug!("already subscribed, skipping handshake");
            return;
        }

        if !self.client.send_subscribe().await {
            warn!("subscribe handshake not sent, will retry next start");
            return;
        }

        if let Err(e) = ledger.mark() {
            // Worst case the handshake repeats once after a restart.
            warn!(error = %e, "failed to persist subscription flag");
        }
    }
}

/// Metrics cycle: sample, detect anomalies, drain flow records
async fn monitoring_loop(
    client: TransportClient,
    flows: Arc<FlowQueue>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut sampler = SystemSampler::new();
    let mut detector = BaselineDetector::default();
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(metrics) = sampler.sample() {
                    let anomalies = detector.analyze(&metrics);

                    client.publish("agent.resource-monitoring", json!(metrics)).await;

                    if !anomalies.is_empty() {
                        warn!(count = anomalies.len(), "anomalies detected");
                        client
                            .publish(
                                "agent.alert",
                                json!({
                                    "alert_type": "anomaly",
                                    "anomalies": anomalies,
                                    "timestamp": chrono::Utc::now().to_rfc3339(),
                                }),
                            )
                            .await;
                    }
                }

                let batch = flows.drain().await;
                if !batch.is_empty() {
                    debug!(count = batch.len(), "publishing network flows");
                    client
                        .publish(
                            "agent.network-traffic",
                            json!({
                                "flows": batch,
                                "count": batch.len(),
                                "timestamp": chrono::Utc::now().to_rfc3339(),
                            }),
                        )
                        .await;
                }
            }
            _ = shutdown.recv() => {
                info!("stopping monitoring loop");
                break;
            }
        }
    }
}

/// Security cycle: collect events, correlate threats
async fn security_loop(
    client: TransportClient,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut collector = SecurityCollector::new();
    let mut engine = ThreatEngine::new(ThreatConfig::default(), chrono::Utc::now().timestamp());
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let events = collector.collect();
                let threats = engine.observe(&events, chrono::Utc::now().timestamp());

                client
                    .publish(
                        "agent.security-events",
                        json!({
                            "events": events,
                            "analysis": threats,
                        }),
                    )
                    .await;

                if !threats.is_empty() {
                    warn!(count = threats.len(), "threats detected");
                    client
                        .publish(
                            "agent.alert",
                            json!({
                                "alert_type": "security",
                                "threats": threats,
                                "timestamp": chrono::Utc::now().to_rfc3339(),
                            }),
                        )
                        .await;
                }
            }
            _ = shutdown.recv() => {
                info!("stopping security loop");
                break;
            }
        }
    }
}

/// Log cycle: ship interesting batches, alert on errors
async fn log_loop(
    client: TransportClient,
    send_all: bool,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut tailer = LogTailer::new();
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(batch) = tailer.collect() else {
                    continue;
                };

                if send_all || batch.has_errors || batch.has_warnings {
                    client.publish("agent.logs", json!(batch)).await;
                }

                if batch.has_errors {
                    client.publish("agent.alert", log_alert(&batch)).await;
                }
            }
            _ = shutdown.recv() => {
                info!("stopping log loop");
                break;
            }
        }
    }
}

/// Alert payload carrying the first few error lines of a batch
fn log_alert(batch: &LogBatch) -> serde_json::Value {
    let errors: Vec<_> = batch
        .entries
        .iter()
        .filter(|entry| entry.severity == Severity::Error)
        .take(MAX_ALERT_ERRORS)
        .collect();

    let error_count = batch
        .stats
        .by_severity
        .get("error")
        .copied()
        .unwrap_or(errors.len());

    json!({
        "alert_type": "log",
        "errors": errors,
        "error_count": error_count,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}
