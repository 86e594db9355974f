//! Threat correlation over security event batches
//!
//! Keeps sliding-window counters keyed by actor (source IP or
//! username) and emits findings when a counter crosses its configured
//! limit. Windows are cleared wholesale once their age exceeds the
//! configured duration; the sweep runs at the top of every call.

use crate::models::{SecurityEvents, ThreatFinding};
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Usernames excluded from brute-force tracking to avoid noise
const SYSTEM_ACCOUNTS: &[&str] = &["root", "nobody", "daemon"];

/// Thresholds and window durations for threat correlation
#[derive(Debug, Clone)]
pub struct ThreatConfig {
    /// Events from one IP before a brute-force finding fires
    pub ip_threshold: u32,
    /// Auth failures for one username before a finding fires
    pub auth_threshold: u32,
    /// Distinct local ports touched by one remote IP before a
    /// port-scan finding fires
    pub scan_threshold: usize,
    /// IP activity window in seconds
    pub ip_window_secs: i64,
    /// Auth failure window in seconds
    pub auth_window_secs: i64,
    /// Port-scan tracking window in seconds
    pub scan_window_secs: i64,
}

impl Default for ThreatConfig {
    fn default() -> Self {
        Self {
            ip_threshold: 5,
            auth_threshold: 3,
            scan_threshold: 10,
            ip_window_secs: 3600,
            auth_window_secs: 300,
            scan_window_secs: 60,
        }
    }
}

/// Correlates security events into threat findings
pub struct ThreatEngine {
    config: ThreatConfig,
    ip_activity: HashMap<String, u32>,
    auth_failures: HashMap<String, u32>,
    port_scans: HashMap<String, BTreeSet<u16>>,
    last_ip_sweep: i64,
    last_auth_sweep: i64,
    last_scan_sweep: i64,
    ip_pattern: Regex,
    user_pattern: Regex,
    port_pattern: Regex,
}

impl ThreatEngine {
    /// Create an engine whose windows start at `now` (unix seconds)
    pub fn new(config: ThreatConfig, now: i64) -> Self {
        Self {
            config,
            ip_activity: HashMap::new(),
            auth_failures: HashMap::new(),
            port_scans: HashMap::new(),
            last_ip_sweep: now,
            last_auth_sweep: now,
            last_scan_sweep: now,
            ip_pattern: Regex::new(r"from\s+(\d+\.\d+\.\d+\.\d+)")
                .expect("ip extraction pattern is valid"),
            user_pattern: Regex::new(r"(?:user|for|USER)\s+(\w+)")
                .expect("user extraction pattern is valid"),
            port_pattern: Regex::new(r":(\d+)$").expect("port extraction pattern is valid"),
        }
    }

    /// Process one event batch observed at `now` (unix seconds).
    ///
    /// Findings are re-emitted on every matching event while the
    /// counter stays at or above its threshold; deduplication of
    /// repeated alerts is the caller's concern.
    pub fn observe(&mut self, events: &SecurityEvents, now: i64) -> Vec<ThreatFinding> {
        self.sweep_expired(now);

        let mut findings = self.analyze_auth_events(events);
        findings.extend(self.analyze_network_events(events));
        findings.extend(self.analyze_process_events(events));

        if !findings.is_empty() {
            debug!(count = findings.len(), "threat findings produced");
        }

        findings
    }

    /// Number of tracked auth failures for a username (for tests and
    /// diagnostics)
    pub fn auth_failure_count(&self, username: &str) -> u32 {
        self.auth_failures.get(username).copied().unwrap_or(0)
    }

    /// Number of tracked events for a source IP
    pub fn ip_activity_count(&self, ip: &str) -> u32 {
        self.ip_activity.get(ip).copied().unwrap_or(0)
    }

    fn analyze_auth_events(&mut self, events: &SecurityEvents) -> Vec<ThreatFinding> {
        let mut findings = Vec::new();

        for login in &events.suspicious_logins {
            if let Some(caps) = self.ip_pattern.captures(&login.entry) {
                let ip = caps[1].to_string();
                let count = self.ip_activity.entry(ip.clone()).or_insert(0);
                *count += 1;

                if *count >= self.config.ip_threshold {
                    findings.push(ThreatFinding::BruteForceIp {
                        description: format!("Possible brute force attack from IP {ip}"),
                        count: *count,
                        threshold: self.config.ip_threshold,
                        ip,
                    });
                }
            }

            if let Some(caps) = self.user_pattern.captures(&login.entry) {
                let username = caps[1].to_string();
                if SYSTEM_ACCOUNTS.contains(&username.as_str()) {
                    continue;
                }

                let count = self.auth_failures.entry(username.clone()).or_insert(0);
                *count += 1;

                if *count >= self.config.auth_threshold {
                    findings.push(ThreatFinding::BruteForceUser {
                        description: format!(
                            "Possible brute force attack targeting user {username}"
                        ),
                        count: *count,
                        threshold: self.config.auth_threshold,
                        username,
                    });
                }
            }
        }

        findings
    }

    fn analyze_network_events(&mut self, events: &SecurityEvents) -> Vec<ThreatFinding> {
        let mut findings = Vec::new();

        for conn in &events.active_connections {
            if conn.remote_ip.is_empty() {
                continue;
            }

            let Some(port) = self
                .port_pattern
                .captures(&conn.local)
                .and_then(|caps| caps[1].parse::<u16>().ok())
            else {
                continue;
            };

            let ports = self.port_scans.entry(conn.remote_ip.clone()).or_default();
            ports.insert(port);

            if ports.len() >= self.config.scan_threshold {
                findings.push(ThreatFinding::PortScan {
                    ip: conn.remote_ip.clone(),
                    ports: ports.iter().copied().collect(),
                    count: ports.len(),
                    threshold: self.config.scan_threshold,
                    description: format!("Possible port scanning from IP {}", conn.remote_ip),
                });
            }
        }

        findings
    }

    /// Extension point: process reputation analysis is not implemented
    /// and yields no findings.
    fn analyze_process_events(&mut self, _events: &SecurityEvents) -> Vec<ThreatFinding> {
        Vec::new()
    }

    /// Clear each window in full once its age exceeds its duration.
    /// Counts reset to zero together with the sweep epoch; per-key
    /// decay is deliberately not attempted.
    fn sweep_expired(&mut self, now: i64) {
        if now - self.last_ip_sweep > self.config.ip_window_secs {
            self.ip_activity.clear();
            self.last_ip_sweep = now;
        }

        if now - self.last_auth_sweep > self.config.auth_window_secs {
            self.auth_failures.clear();
            self.last_auth_sweep = now;
        }

        if now - self.last_scan_sweep > self.config.scan_window_secs {
            self.port_scans.clear();
            self.last_scan_sweep = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActiveConnection, SuspiciousLogin};

    const T0: i64 = 1_700_000_000;

    fn engine() -> ThreatEngine {
        ThreatEngine::new(ThreatConfig::default(), T0)
    }

    fn login(entry: &str) -> SuspiciousLogin {
        SuspiciousLogin {
            log_file: "/var/log/auth.log".to_string(),
            entry: entry.to_string(),
            pattern: "Failed password".to_string(),
        }
    }

    fn auth_batch(entries: &[&str]) -> SecurityEvents {
        SecurityEvents {
            suspicious_logins: entries.iter().map(|e| login(e)).collect(),
            ..Default::default()
        }
    }

    fn conn(remote_ip: &str, local_port: u16) -> ActiveConnection {
        ActiveConnection {
            local: format!("10.0.0.1:{local_port}"),
            remote: format!("{remote_ip}:55123"),
            remote_ip: remote_ip.to_string(),
        }
    }

    #[test]
    fn test_brute_force_ip_crosses_on_fifth_and_reemits_on_sixth() {
        let mut eng = engine();
        let line = "Failed password for invalid user admin2 from 10.0.0.7 port 22";

        let findings = eng.observe(&auth_batch(&[line; 4]), T0);
        let ip_findings: Vec<_> = findings
            .iter()
            .filter(|f| matches!(f, ThreatFinding::BruteForceIp { .. }))
            .collect();
        assert!(ip_findings.is_empty());

        // Fifth and sixth events both report: level-triggered, not
        // edge-triggered.
        let findings = eng.observe(&auth_batch(&[line; 2]), T0 + 1);
        let counts: Vec<u32> = findings
            .iter()
            .filter_map(|f| match f {
                ThreatFinding::BruteForceIp { ip, count, .. } if ip == "10.0.0.7" => Some(*count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, vec![5, 6]);
    }

    #[test]
    fn test_brute_force_user_threshold() {
        let mut eng = engine();
        let line = "Failed password for alice port 22 ssh2";

        let findings = eng.observe(&auth_batch(&[line, line]), T0);
        assert!(findings.is_empty());

        let findings = eng.observe(&auth_batch(&[line]), T0);
        assert_eq!(findings.len(), 1);
        match &findings[0] {
            ThreatFinding::BruteForceUser {
                username,
                count,
                threshold,
                ..
            } => {
                assert_eq!(username, "alice");
                assert_eq!(*count, 3);
                assert_eq!(*threshold, 3);
            }
            other => panic!("unexpected finding: {other:?}"),
        }
    }

    #[test]
    fn test_system_accounts_not_tracked() {
        let mut eng = engine();
        let line = "Failed password for root port 22 ssh2";

        for _ in 0..5 {
            let findings = eng.observe(&auth_batch(&[line]), T0);
            assert!(findings.is_empty());
        }
        assert_eq!(eng.auth_failure_count("root"), 0);
    }

    #[test]
    fn test_port_scan_fires_exactly_at_threshold() {
        let mut eng = engine();

        // Nine distinct ports: below threshold, silent.
        let conns: Vec<_> = (1u16..=9).map(|p| conn("1.2.3.4", 8000 + p)).collect();
        let batch = SecurityEvents {
            active_connections: conns,
            ..Default::default()
        };
        assert!(eng.observe(&batch, T0).is_empty());

        // Tenth distinct port crosses the threshold.
        let batch = SecurityEvents {
            active_connections: vec![conn("1.2.3.4", 8010)],
            ..Default::default()
        };
        let findings = eng.observe(&batch, T0 + 1);
        assert_eq!(findings.len(), 1);
        match &findings[0] {
            ThreatFinding::PortScan { count, ports, .. } => {
                assert_eq!(*count, 10);
                assert_eq!(ports.len(), 10);
            }
            other => panic!("unexpected finding: {other:?}"),
        }
    }

    #[test]
    fn test_revisited_port_is_not_double_counted() {
        let mut eng = engine();

        let conns: Vec<_> = (1u16..=10).map(|p| conn("1.2.3.4", 8000 + p)).collect();
        let batch = SecurityEvents {
            active_connections: conns,
            ..Default::default()
        };
        eng.observe(&batch, T0);

        // Eleventh connection to an already-seen port: still count 10.
        let batch = SecurityEvents {
            active_connections: vec![conn("1.2.3.4", 8003)],
            ..Default::default()
        };
        let findings = eng.observe(&batch, T0 + 1);
        assert_eq!(findings.len(), 1);
        match &findings[0] {
            ThreatFinding::PortScan { count, .. } => assert_eq!(*count, 10),
            other => panic!("unexpected finding: {other:?}"),
        }
    }

    #[test]
    fn test_auth_window_cleanup_resets_counts_to_zero() {
        let mut eng = engine();
        let line = "Invalid user bob from 192.168.1.50";

        eng.observe(&auth_batch(&[line, line]), T0);
        assert_eq!(eng.auth_failure_count("bob"), 2);

        // Past the 5-minute auth window: counter starts over, never
        // goes negative, holds no stale entries.
        let findings = eng.observe(&auth_batch(&[line]), T0 + 301);
        assert!(findings.is_empty());
        assert_eq!(eng.auth_failure_count("bob"), 1);
    }

    #[test]
    fn test_windows_expire_independently() {
        let mut eng = engine();
        let line = "Invalid user carol from 172.16.0.9";

        eng.observe(&auth_batch(&[line]), T0);
        assert_eq!(eng.ip_activity_count("172.16.0.9"), 1);
        assert_eq!(eng.auth_failure_count("carol"), 1);

        // Past the auth window but inside the 1-hour IP window: only
        // the auth counters reset.
        eng.observe(&SecurityEvents::default(), T0 + 301);
        assert_eq!(eng.ip_activity_count("172.16.0.9"), 1);
        assert_eq!(eng.auth_failure_count("carol"), 0);
    }

    #[test]
    fn test_empty_batch_produces_nothing() {
        let mut eng = engine();
        assert!(eng.observe(&SecurityEvents::default(), T0).is_empty());
    }
}
