//! Resilient client for the collector connection
//!
//! Owns the single outbound session and its connect/retry/backoff
//! state machine. One async mutex guards the connection state, the
//! retry counter and the live sink, so an explicit `connect` caller
//! and the remote-close handler can never race each other and at most
//! one connection attempt is in flight.

use super::{CloseReason, Session, Transport, TransportSink};
use crate::models::{AgentIdentity, Envelope, HostFacts};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

/// Configuration for the transport client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Maximum connection attempts before giving up
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Upper bound on waiting for one open acknowledgment
    pub open_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            open_timeout: Duration::from_secs(5),
        }
    }
}

/// Lifecycle of the one logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Entered only on explicit stop; terminal
    Closing,
}

struct ClientState {
    state: ConnectionState,
    retry_count: u32,
    /// Bumped whenever the live session changes, so watchers spawned
    /// for an older session cannot act on the current one
    epoch: u64,
    sink: Option<Box<dyn TransportSink>>,
}

struct Inner {
    config: ClientConfig,
    identity: AgentIdentity,
    facts: HostFacts,
    transport: Arc<dyn Transport>,
    state: Mutex<ClientState>,
}

/// Client for publishing envelopes to the remote collector.
///
/// Cheap to clone; all clones share the same connection. The retry
/// counter resets to zero on a successful connect and is left at
/// `max_retries` after the budget is exhausted, so later calls fail
/// fast until a successful reconnect.
#[derive(Clone)]
pub struct TransportClient {
    inner: Arc<Inner>,
}

impl TransportClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        identity: AgentIdentity,
        facts: HostFacts,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                identity,
                facts,
                transport,
                state: Mutex::new(ClientState {
                    state: ConnectionState::Disconnected,
                    retry_count: 0,
                    epoch: 0,
                    sink: None,
                }),
            }),
        }
    }

    /// Establish the connection, retrying with a fixed delay.
    ///
    /// Returns true only once the session is open. The lock is held
    /// across the whole attempt sequence, so concurrent callers
    /// serialize instead of racing.
    pub async fn connect(&self) -> bool {
        let mut st = self.inner.state.lock().await;
        self.connect_locked(&mut st).await
    }

    async fn connect_locked(&self, st: &mut ClientState) -> bool {
        match st.state {
            ConnectionState::Connected => return true,
            ConnectionState::Closing => return false,
            _ => {}
        }

        let config = &self.inner.config;
        let mut first_attempt = true;

        while st.retry_count < config.max_retries {
            if !first_attempt {
                sleep(config.retry_delay).await;
            }
            first_attempt = false;

            st.state = ConnectionState::Connecting;
            info!(attempt = st.retry_count + 1, "connecting to collector");

            match timeout(config.open_timeout, self.inner.transport.open()).await {
                Ok(Ok(session)) => {
                    st.state = ConnectionState::Connected;
                    st.retry_count = 0;
                    st.epoch += 1;
                    self.install_session(st, session);
                    info!("collector connection established");
                    return true;
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "connection attempt failed");
                }
                Err(_) => {
                    warn!(
                        timeout_secs = config.open_timeout.as_secs(),
                        "connection attempt timed out"
                    );
                }
            }

            st.retry_count += 1;
        }

        error!(
            attempts = config.max_retries,
            "failed to connect to collector, retry budget exhausted"
        );
        st.state = ConnectionState::Disconnected;
        false
    }

    fn install_session(&self, st: &mut ClientState, session: Session) {
        st.sink = Some(session.sink);

        let client = self.clone();
        let epoch = st.epoch;
        tokio::spawn(watch_session(client, session.closed, epoch));
    }

    /// Publish one envelope.
    ///
    /// Reconnects first when necessary. Returns false instead of
    /// raising on any failure; the caller logs and drops the cycle.
    pub async fn publish(&self, event: &str, data: serde_json::Value) -> bool {
        let envelope = Envelope {
            event: event.to_string(),
            server_id: self.inner.identity.server_id.clone(),
            channel: self.inner.identity.channel.clone(),
            agent_version: self.inner.identity.agent_version.clone(),
            data,
        };

        let frame = match serde_json::to_string(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                error!(event, error = %e, "failed to serialize envelope");
                return false;
            }
        };

        self.send_frame(event, frame).await
    }

    /// Send the one-time identification message.
    ///
    /// The caller is responsible for invoking this exactly once per
    /// install, backed by the durable [`super::SubscribeLedger`] flag.
    pub async fn send_subscribe(&self) -> bool {
        let identity = &self.inner.identity;
        let facts = &self.inner.facts;

        let message = json!({
            "event": "agent.subscribe",
            "server_id": identity.server_id,
            "channel": identity.channel,
            "agent_version": identity.agent_version,
            "hostname": facts.hostname,
            "platform": facts.platform,
            "platform_version": facts.platform_version,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "data": [{"event": "agent.subscribe"}],
        });

        let sent = self.send_frame("agent.subscribe", message.to_string()).await;
        if sent {
            info!("subscribe handshake sent");
        }
        sent
    }

    async fn send_frame(&self, event: &str, frame: String) -> bool {
        let mut st = self.inner.state.lock().await;

        if st.state != ConnectionState::Connected {
            warn!(event, "not connected, attempting to reconnect before send");
            if !self.connect_locked(&mut st).await {
                error!(event, "reconnect failed, message not sent");
                return false;
            }
        }

        let Some(sink) = st.sink.as_mut() else {
            return false;
        };

        match sink.send(frame).await {
            Ok(()) => {
                debug!(event, "message sent");
                true
            }
            Err(e) => {
                error!(event, error = %e, "send failed, marking disconnected");
                st.state = ConnectionState::Disconnected;
                st.sink = None;
                st.epoch += 1;
                false
            }
        }
    }

    /// Handle a remote close observed by a session watcher
    async fn handle_remote_close(&self, epoch: u64, reason: CloseReason) {
        let mut st = self.inner.state.lock().await;

        // A newer session has already replaced the one this watcher
        // belonged to.
        if st.epoch != epoch {
            return;
        }

        if st.state == ConnectionState::Closing {
            return;
        }

        warn!(%reason, "collector connection lost");
        st.state = ConnectionState::Disconnected;
        st.sink = None;
        st.epoch += 1;

        if st.retry_count < self.inner.config.max_retries {
            info!("attempting to reconnect");
            self.connect_locked(&mut st).await;
        }
    }

    /// Close the connection for good; the client will not reconnect
    pub async fn close(&self) {
        let mut st = self.inner.state.lock().await;
        st.state = ConnectionState::Closing;
        st.epoch += 1;

        if let Some(mut sink) = st.sink.take() {
            sink.shutdown().await;
        }
        info!("collector connection closed");
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.state.lock().await.state == ConnectionState::Connected
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.state.lock().await.state
    }

    pub async fn retry_count(&self) -> u32 {
        self.inner.state.lock().await.retry_count
    }
}

async fn watch_session(
    client: TransportClient,
    closed: oneshot::Receiver<CloseReason>,
    epoch: u64,
) {
    // A dropped sender also means the session is gone.
    let reason = closed.await.unwrap_or(CloseReason::RemoteClosed);
    client.handle_remote_close(epoch, reason).await;
}
