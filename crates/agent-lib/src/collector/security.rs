//! Security event collection
//!
//! Tails the authentication logs for known attack patterns and reads
//! listening sockets and established connections from /proc/net. The
//! resulting batch feeds the threat correlation engine.

use super::TailedFile;
use crate::models::{ActiveConnection, OpenPort, SecurityEvents, SuspiciousLogin};
use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use tracing::{info, warn};

/// Security-relevant log files, filtered to those that exist
const CANDIDATE_AUTH_LOGS: &[&str] = &[
    "/var/log/auth.log",
    "/var/log/secure",
    "/var/log/syslog",
    "/var/log/messages",
];

/// Common attack signatures matched against new auth log lines
const SUSPICIOUS_PATTERNS: &[&str] = &[
    r"Failed password for .* from",
    r"Invalid user .* from",
    r"authentication failure",
    r"POSSIBLE BREAK-IN ATTEMPT",
    r"refused connect from",
    r"pam_unix\(sshd:auth\): authentication failure",
];

/// TCP socket states from /proc/net/tcp
const TCP_ESTABLISHED: u8 = 0x01;
const TCP_LISTEN: u8 = 0x0A;

/// Collects authentication, port and connection events
pub struct SecurityCollector {
    auth_logs: Vec<TailedFile>,
    patterns: Vec<Regex>,
    proc_net: PathBuf,
}

impl SecurityCollector {
    pub fn new() -> Self {
        let existing = CANDIDATE_AUTH_LOGS
            .iter()
            .filter(|path| std::path::Path::new(*path).exists())
            .map(PathBuf::from)
            .collect();

        let collector = Self::with_sources(existing, "/proc/net");
        info!(
            files = collector.auth_logs.len(),
            "security collector initialized"
        );
        collector
    }

    /// Use explicit auth log paths and proc/net directory (for tests)
    pub fn with_sources(auth_logs: Vec<PathBuf>, proc_net: impl Into<PathBuf>) -> Self {
        let auth_logs = auth_logs
            .into_iter()
            .filter_map(|path| match TailedFile::seeded_at_end(path) {
                Ok(tail) => Some(tail),
                Err(e) => {
                    warn!(error = %e, "skipping unreadable auth log");
                    None
                }
            })
            .collect();

        let patterns = SUSPICIOUS_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("suspicious pattern is valid"))
            .collect();

        Self {
            auth_logs,
            patterns,
            proc_net: proc_net.into(),
        }
    }

    /// Gather one batch of security events.
    ///
    /// Individual source failures are logged and leave their section
    /// empty; the batch is always produced.
    pub fn collect(&mut self) -> SecurityEvents {
        let suspicious_logins = self.check_auth_logs();
        let open_ports = self.check_open_ports().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read listening ports");
            Vec::new()
        });
        let active_connections = self.check_active_connections().unwrap_or_else(|e| {
            warn!(error = %e, "failed to read active connections");
            Vec::new()
        });
        // Extension point: suspicious process detection is not
        // implemented and stays empty.
        let suspicious_processes = Vec::new();

        let total_suspicious = suspicious_logins.len()
            + open_ports.len()
            + active_connections.len()
            + suspicious_processes.len();

        if !suspicious_logins.is_empty() {
            warn!(
                count = suspicious_logins.len(),
                "suspicious auth activity detected"
            );
        }

        SecurityEvents {
            timestamp: chrono::Utc::now().to_rfc3339(),
            suspicious_logins,
            open_ports,
            active_connections,
            suspicious_processes,
            total_suspicious,
        }
    }

    fn check_auth_logs(&mut self) -> Vec<SuspiciousLogin> {
        let mut entries = Vec::new();

        for tail in &mut self.auth_logs {
            let lines = match tail.read_new_lines() {
                Ok(lines) => lines,
                Err(e) => {
                    warn!(path = %tail.path.display(), error = %e, "failed to read auth log");
                    continue;
                }
            };

            for line in lines {
                if let Some(pattern) = self.patterns.iter().find(|p| p.is_match(&line)) {
                    entries.push(SuspiciousLogin {
                        log_file: tail.path.display().to_string(),
                        entry: line,
                        pattern: pattern.as_str().to_string(),
                    });
                }
            }
        }

        entries
    }

    fn read_sockets(&self, state: u8) -> Result<Vec<SocketEntry>> {
        let mut sockets = Vec::new();

        for (file, v6) in [("tcp", false), ("tcp6", true)] {
            let path = self.proc_net.join(file);
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                // tcp6 is absent on v4-only hosts.
                Err(_) if v6 => continue,
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to read {path:?}"));
                }
            };

            sockets.extend(parse_proc_net_tcp(&content, v6, state));
        }

        Ok(sockets)
    }

    fn check_open_ports(&self) -> Result<Vec<OpenPort>> {
        Ok(self
            .read_sockets(TCP_LISTEN)?
            .into_iter()
            .map(|s| OpenPort {
                port: s.local_port,
                address: format_addr(s.local_ip, s.local_port),
            })
            .collect())
    }

    fn check_active_connections(&self) -> Result<Vec<ActiveConnection>> {
        Ok(self
            .read_sockets(TCP_ESTABLISHED)?
            .into_iter()
            .map(|s| ActiveConnection {
                local: format_addr(s.local_ip, s.local_port),
                remote: format_addr(s.remote_ip, s.remote_port),
                remote_ip: s.remote_ip.to_string(),
            })
            .collect())
    }
}

impl Default for SecurityCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct SocketEntry {
    local_ip: IpAddr,
    local_port: u16,
    remote_ip: IpAddr,
    remote_port: u16,
}

fn format_addr(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{v4}:{port}"),
        IpAddr::V6(v6) => format!("[{v6}]:{port}"),
    }
}

/// Parse /proc/net/tcp (or tcp6) rows matching `wanted_state`
fn parse_proc_net_tcp(content: &str, v6: bool, wanted_state: u8) -> Vec<SocketEntry> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| parse_socket_line(line, v6))
        .filter_map(|(entry, state)| (state == wanted_state).then_some(entry))
        .collect()
}

fn parse_socket_line(line: &str, v6: bool) -> Option<(SocketEntry, u8)> {
    let mut fields = line.split_whitespace();
    let _sl = fields.next()?;
    let local = fields.next()?;
    let remote = fields.next()?;
    let state = u8::from_str_radix(fields.next()?, 16).ok()?;

    let (local_ip, local_port) = parse_hex_addr(local, v6).ok()?;
    let (remote_ip, remote_port) = parse_hex_addr(remote, v6).ok()?;

    Some((
        SocketEntry {
            local_ip,
            local_port,
            remote_ip,
            remote_port,
        },
        state,
    ))
}

/// Decode a procfs `ADDRESS:PORT` pair, both in hex. IPv4 addresses
/// are one little-endian dword; IPv6 addresses are four.
fn parse_hex_addr(s: &str, v6: bool) -> Result<(IpAddr, u16)> {
    let (addr_hex, port_hex) = s
        .split_once(':')
        .ok_or_else(|| anyhow!("malformed socket address {s:?}"))?;

    let port = u16::from_str_radix(port_hex, 16).context("bad port")?;

    let ip = if v6 {
        if addr_hex.len() != 32 {
            return Err(anyhow!("malformed ipv6 address {addr_hex:?}"));
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in addr_hex.as_bytes().chunks(8).enumerate() {
            let word = u32::from_str_radix(std::str::from_utf8(chunk)?, 16)?;
            bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        IpAddr::V6(Ipv6Addr::from(bytes))
    } else {
        let word = u32::from_str_radix(addr_hex, 16).context("bad ipv4 address")?;
        IpAddr::V4(Ipv4Addr::from(word.swap_bytes()))
    };

    Ok((ip, port))
}
