//! Host metrics sampled from /proc and df
//!
//! CPU usage is computed from consecutive /proc/stat readings; the
//! first sample has no delta and reports zero. All failures are
//! logged and turn the cycle's sample into `None`, never an abort.

use crate::models::SystemMetrics;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::process::Command;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
struct CpuTimes {
    busy: u64,
    idle: u64,
}

/// Samples host-level system metrics
pub struct SystemSampler {
    proc_root: PathBuf,
    prev_cpu: Option<CpuTimes>,
}

impl SystemSampler {
    pub fn new() -> Self {
        Self::with_proc_root("/proc")
    }

    /// Point the sampler at an alternate proc tree (used by tests)
    pub fn with_proc_root(root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: root.into(),
            prev_cpu: None,
        }
    }

    /// Take one metrics snapshot.
    ///
    /// Returns `None` when any source fails; the caller skips the
    /// cycle and the next one proceeds normally.
    pub fn sample(&mut self) -> Option<SystemMetrics> {
        match self.try_sample() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!(error = %e, "failed to collect system metrics");
                None
            }
        }
    }

    fn try_sample(&mut self) -> Result<SystemMetrics> {
        let cpu_usage_percent = self.sample_cpu_percent()?;
        let (ram_total, ram_used) = self.read_meminfo()?;
        let (disk_total, disk_used) = disk_usage("/")?;
        let net = self.read_net_totals()?;
        let (load_avg_1m, load_avg_5m, load_avg_15m) = self.read_loadavg()?;
        let uptime_seconds = self.read_uptime()?;

        Ok(SystemMetrics {
            cpu_usage_percent,
            ram_total,
            ram_used,
            disk_total,
            disk_used,
            bytes_sent: net.tx_bytes,
            bytes_received: net.rx_bytes,
            packets_sent: net.tx_packets,
            packets_received: net.rx_packets,
            load_avg_1m,
            load_avg_5m,
            load_avg_15m,
            uptime_seconds,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
    }

    fn read_proc(&self, name: &str) -> Result<String> {
        let path = self.proc_root.join(name);
        std::fs::read_to_string(&path).with_context(|| format!("failed to read {path:?}"))
    }

    fn sample_cpu_percent(&mut self) -> Result<f64> {
        let current = parse_cpu_times(&self.read_proc("stat")?)?;
        let percent = match self.prev_cpu {
            Some(prev) => cpu_percent_between(prev, current),
            None => 0.0,
        };
        self.prev_cpu = Some(current);
        Ok(percent)
    }

    fn read_meminfo(&self) -> Result<(u64, u64)> {
        parse_meminfo(&self.read_proc("meminfo")?)
    }

    fn read_net_totals(&self) -> Result<NetTotals> {
        parse_net_dev(&self.read_proc("net/dev")?)
    }

    fn read_loadavg(&self) -> Result<(f64, f64, f64)> {
        parse_loadavg(&self.read_proc("loadavg")?)
    }

    fn read_uptime(&self) -> Result<u64> {
        parse_uptime(&self.read_proc("uptime")?)
    }
}

impl Default for SystemSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct NetTotals {
    rx_bytes: u64,
    rx_packets: u64,
    tx_bytes: u64,
    tx_packets: u64,
}

fn parse_cpu_times(stat: &str) -> Result<CpuTimes> {
    let line = stat
        .lines()
        .find(|l| l.starts_with("cpu "))
        .ok_or_else(|| anyhow!("no aggregate cpu line in /proc/stat"))?;

    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|f| f.parse::<u64>().unwrap_or(0))
        .collect();

    if fields.len() < 4 {
        return Err(anyhow!("malformed cpu line in /proc/stat"));
    }

    // user nice system idle iowait irq softirq steal ...
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    let busy = fields
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != 3 && *i != 4)
        .map(|(_, v)| v)
        .sum();

    Ok(CpuTimes { busy, idle })
}

fn cpu_percent_between(prev: CpuTimes, current: CpuTimes) -> f64 {
    let busy = current.busy.saturating_sub(prev.busy);
    let idle = current.idle.saturating_sub(prev.idle);
    let total = busy + idle;

    if total == 0 {
        return 0.0;
    }
    (busy as f64 / total as f64) * 100.0
}

fn parse_meminfo(meminfo: &str) -> Result<(u64, u64)> {
    let mut total_kb = None;
    let mut available_kb = None;

    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            total_kb = first_number(rest);
        } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
            available_kb = first_number(rest);
        }
    }

    let total_kb = total_kb.ok_or_else(|| anyhow!("MemTotal missing from meminfo"))?;
    let available_kb = available_kb.ok_or_else(|| anyhow!("MemAvailable missing from meminfo"))?;

    let total = total_kb * 1024;
    let used = total.saturating_sub(available_kb * 1024);
    Ok((total, used))
}

fn first_number(s: &str) -> Option<u64> {
    s.split_whitespace().next()?.parse().ok()
}

/// Sum counters over all interfaces except loopback
fn parse_net_dev(net_dev: &str) -> Result<NetTotals> {
    let mut totals = NetTotals::default();

    for line in net_dev.lines().skip(2) {
        let Some((name, rest)) = line.split_once(':') else {
            continue;
        };
        if name.trim() == "lo" {
            continue;
        }

        let fields: Vec<u64> = rest
            .split_whitespace()
            .map(|f| f.parse::<u64>().unwrap_or(0))
            .collect();
        if fields.len() < 10 {
            continue;
        }

        totals.rx_bytes += fields[0];
        totals.rx_packets += fields[1];
        totals.tx_bytes += fields[8];
        totals.tx_packets += fields[9];
    }

    Ok(totals)
}

fn parse_loadavg(loadavg: &str) -> Result<(f64, f64, f64)> {
    let mut parts = loadavg.split_whitespace();
    let one = parts.next().and_then(|p| p.parse().ok());
    let five = parts.next().and_then(|p| p.parse().ok());
    let fifteen = parts.next().and_then(|p| p.parse().ok());

    match (one, five, fifteen) {
        (Some(a), Some(b), Some(c)) => Ok((a, b, c)),
        _ => Err(anyhow!("malformed /proc/loadavg")),
    }
}

fn parse_uptime(uptime: &str) -> Result<u64> {
    uptime
        .split_whitespace()
        .next()
        .and_then(|p| p.parse::<f64>().ok())
        .map(|secs| secs as u64)
        .ok_or_else(|| anyhow!("malformed /proc/uptime"))
}

/// Filesystem usage via `df -kP`, in bytes.
///
/// /proc has no per-filesystem usage, so this shells out the way the
/// original netstat-based collectors did.
fn disk_usage(mount: &str) -> Result<(u64, u64)> {
    let output = Command::new("df")
        .args(["-kP", mount])
        .output()
        .context("failed to run df")?;

    if !output.status.success() {
        return Err(anyhow!("df exited with {}", output.status));
    }

    parse_df_output(&String::from_utf8_lossy(&output.stdout))
}

fn parse_df_output(out: &str) -> Result<(u64, u64)> {
    let line = out
        .lines()
        .nth(1)
        .ok_or_else(|| anyhow!("df produced no data line"))?;

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return Err(anyhow!("malformed df output"));
    }

    let total_kb: u64 = fields[1].parse().context("bad df total")?;
    let used_kb: u64 = fields[2].parse().context("bad df used")?;
    Ok((total_kb * 1024, used_kb * 1024))
}
