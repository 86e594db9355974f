//! Agent configuration

use anyhow::{Context, Result};
use serde::Deserialize;

/// Agent configuration, sourced from the environment.
///
/// `server_id`, `collector_uri` and `channel` identify this install to
/// the collector and have no sensible defaults; startup fails without
/// them.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Unique identifier for this host
    pub server_id: String,

    /// Collector endpoint, `tcp://host:port`
    pub collector_uri: String,

    /// Channel the collector routes this agent's events to
    pub channel: String,

    /// Version string reported in every envelope
    #[serde(default = "default_agent_version")]
    pub agent_version: String,

    /// Seconds between metric collection cycles
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval: u64,

    /// Connection attempts before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Log level when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Ship every log batch, not just those with errors or warnings
    #[serde(default)]
    pub send_all_logs: bool,

    /// Directory for durable agent state
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
}

fn default_agent_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_monitoring_interval() -> u64 {
    20
}

fn default_max_retries() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_state_dir() -> String {
    "/var/lib/hostwatch".to_string()
}

impl AgentConfig {
    /// Load configuration from environment variables
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::default().try_parsing(true))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = config::Config::builder()
            .add_source(source)
            .build()
            .context("failed to read configuration")?;

        config
            .try_deserialize()
            .context("invalid configuration (SERVER_ID, COLLECTOR_URI and CHANNEL are required)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_source() -> config::Config {
        config::Config::builder()
            .set_override("server_id", "srv-1")
            .unwrap()
            .set_override("collector_uri", "tcp://collector:9000")
            .unwrap()
            .set_override("channel", "fleet-a")
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_defaults_populate() {
        let config: AgentConfig = full_source().try_deserialize().unwrap();
        assert_eq!(config.monitoring_interval, 20);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.log_level, "info");
        assert!(!config.send_all_logs);
        assert_eq!(config.state_dir, "/var/lib/hostwatch");
    }

    #[test]
    fn test_missing_server_id_is_an_error() {
        let source = config::Config::builder()
            .set_override("collector_uri", "tcp://collector:9000")
            .unwrap()
            .set_override("channel", "fleet-a")
            .unwrap()
            .build()
            .unwrap();

        assert!(source.try_deserialize::<AgentConfig>().is_err());
    }

    #[test]
    fn test_overrides_win_over_defaults() {
        let source = config::Config::builder()
            .add_source(full_source())
            .set_override("monitoring_interval", 5)
            .unwrap()
            .set_override("send_all_logs", true)
            .unwrap()
            .build()
            .unwrap();

        let config: AgentConfig = source.try_deserialize().unwrap();
        assert_eq!(config.monitoring_interval, 5);
        assert!(config.send_all_logs);
    }
}
