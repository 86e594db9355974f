//! Core data models for the telemetry agent

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One snapshot of host-level system metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub cpu_usage_percent: f64,
    pub ram_total: u64,
    pub ram_used: u64,
    pub disk_total: u64,
    pub disk_used: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub packets_sent: u64,
    pub packets_received: u64,
    pub load_avg_1m: f64,
    pub load_avg_5m: f64,
    pub load_avg_15m: f64,
    pub uptime_seconds: u64,
    pub timestamp: String,
}

impl SystemMetrics {
    /// RAM usage as a percentage of total
    pub fn ram_percent(&self) -> f64 {
        if self.ram_total == 0 {
            return 0.0;
        }
        (self.ram_used as f64 / self.ram_total as f64) * 100.0
    }

    /// Disk usage as a percentage of total
    pub fn disk_percent(&self) -> f64 {
        if self.disk_total == 0 {
            return 0.0;
        }
        (self.disk_used as f64 / self.disk_total as f64) * 100.0
    }
}

/// A detected deviation from a metric's rolling baseline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyFinding {
    /// Metric identifier, e.g. "cpu_usage" or "network_receive"
    #[serde(rename = "type")]
    pub metric: String,
    /// Value that was compared against the threshold (raw for gauges,
    /// delta for cumulative counters)
    pub current: f64,
    pub baseline: f64,
    pub threshold: f64,
    pub description: String,
}

/// A detected threat keyed by actor (IP address or username)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThreatFinding {
    BruteForceIp {
        ip: String,
        count: u32,
        threshold: u32,
        description: String,
    },
    BruteForceUser {
        username: String,
        count: u32,
        threshold: u32,
        description: String,
    },
    PortScan {
        ip: String,
        ports: Vec<u16>,
        count: usize,
        threshold: usize,
        description: String,
    },
}

impl ThreatFinding {
    /// The actor key this finding is attributed to
    pub fn actor(&self) -> &str {
        match self {
            ThreatFinding::BruteForceIp { ip, .. } => ip,
            ThreatFinding::BruteForceUser { username, .. } => username,
            ThreatFinding::PortScan { ip, .. } => ip,
        }
    }
}

/// One suspicious authentication log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousLogin {
    pub log_file: String,
    pub entry: String,
    pub pattern: String,
}

/// A locally listening port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPort {
    pub port: u16,
    pub address: String,
}

/// An established network connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveConnection {
    pub local: String,
    pub remote: String,
    pub remote_ip: String,
}

/// One batch of collected security events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityEvents {
    pub timestamp: String,
    pub suspicious_logins: Vec<SuspiciousLogin>,
    pub open_ports: Vec<OpenPort>,
    pub active_connections: Vec<ActiveConnection>,
    pub suspicious_processes: Vec<serde_json::Value>,
    pub total_suspicious: usize,
}

impl SecurityEvents {
    /// Whether the batch contains anything worth analyzing
    pub fn is_empty(&self) -> bool {
        self.suspicious_logins.is_empty()
            && self.open_ports.is_empty()
            && self.active_connections.is_empty()
            && self.suspicious_processes.is_empty()
    }
}

/// Log line severity, in descending priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

/// One collected log line with its classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub file: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: Severity,
    pub content: String,
}

/// Counts accumulated over one log collection cycle
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogStats {
    pub total: usize,
    pub by_type: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
}

/// One batch of freshly collected log entries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    pub timestamp: String,
    pub entries: Vec<LogEntry>,
    pub stats: LogStats,
    pub has_errors: bool,
    pub has_warnings: bool,
    pub importance: String,
}

/// One observed network flow, produced by an external capture source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRecord {
    pub from: String,
    pub to: String,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub protocol: String,
    pub size: usize,
    pub timestamp: String,
}

/// Stable per-install identity carried on every outbound message
#[derive(Debug, Clone)]
pub struct AgentIdentity {
    pub server_id: String,
    pub channel: String,
    pub agent_version: String,
}

/// Host facts included in the subscribe handshake
#[derive(Debug, Clone)]
pub struct HostFacts {
    pub hostname: String,
    pub platform: String,
    pub platform_version: String,
}

impl HostFacts {
    /// Gather facts from the local host, falling back to placeholders
    /// when a source is unavailable
    pub fn gather() -> Self {
        let hostname = std::fs::read_to_string("/proc/sys/kernel/hostname")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let platform_version = std::fs::read_to_string("/proc/sys/kernel/osrelease")
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        Self {
            hostname,
            platform: std::env::consts::OS.to_string(),
            platform_version,
        }
    }
}

/// Outer wrapper for every published message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub server_id: String,
    pub channel: String,
    pub agent_version: String,
    pub data: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threat_finding_wire_shape() {
        let finding = ThreatFinding::PortScan {
            ip: "1.2.3.4".to_string(),
            ports: vec![22, 80],
            count: 2,
            threshold: 10,
            description: "Possible port scanning from IP 1.2.3.4".to_string(),
        };

        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["type"], "port_scan");
        assert_eq!(json["ip"], "1.2.3.4");
        assert_eq!(json["count"], 2);
    }

    #[test]
    fn test_ram_and_disk_percent() {
        let metrics = SystemMetrics {
            cpu_usage_percent: 10.0,
            ram_total: 1000,
            ram_used: 250,
            disk_total: 2000,
            disk_used: 1000,
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
            load_avg_1m: 0.0,
            load_avg_5m: 0.0,
            load_avg_15m: 0.0,
            uptime_seconds: 0,
            timestamp: String::new(),
        };

        assert!((metrics.ram_percent() - 25.0).abs() < f64::EPSILON);
        assert!((metrics.disk_percent() - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_percent_with_zero_total() {
        let metrics = SystemMetrics {
            cpu_usage_percent: 0.0,
            ram_total: 0,
            ram_used: 0,
            disk_total: 0,
            disk_used: 0,
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
            load_avg_1m: 0.0,
            load_avg_5m: 0.0,
            load_avg_15m: 0.0,
            uptime_seconds: 0,
            timestamp: String::new(),
        };

        assert_eq!(metrics.ram_percent(), 0.0);
        assert_eq!(metrics.disk_percent(), 0.0);
    }
}
