//! Baseline anomaly detection
//!
//! Maintains a rolling per-metric history and flags samples that exceed
//! a threshold of mean + k standard deviations. Cumulative counters
//! (network byte totals) are compared as deltas against the threshold;
//! gauges (CPU/RAM/disk percentages) are compared directly.

use crate::models::{AnomalyFinding, SystemMetrics};
use std::collections::HashMap;
use std::collections::VecDeque;

/// Default rolling history capacity per metric
const DEFAULT_HISTORY_SIZE: usize = 30;

/// Minimum samples required before findings are produced
const MIN_SAMPLES_FOR_DETECTION: usize = 5;

/// How a metric's value relates to its history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Point-in-time value, compared directly (CPU %, RAM %, disk %)
    Gauge,
    /// Monotonic total, compared as a delta from the previous sample
    Counter,
}

/// Fixed-capacity rolling window of values for one metric
#[derive(Debug, Clone)]
pub struct MetricHistory {
    values: VecDeque<f64>,
    capacity: usize,
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a value, evicting the oldest when at capacity
    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value preceding the most recent one, if any
    pub fn previous(&self) -> Option<f64> {
        let n = self.values.len();
        if n < 2 {
            return None;
        }
        self.values.get(n - 2).copied()
    }

    /// Compute (baseline, threshold) over the full window.
    ///
    /// Baseline is the arithmetic mean; threshold adds `multiplier`
    /// population standard deviations. With an all-equal window the
    /// variance is zero and the threshold equals the baseline.
    pub fn baseline_threshold(&self, multiplier: f64) -> (f64, f64) {
        let n = self.values.len() as f64;
        if n == 0.0 {
            return (0.0, 0.0);
        }

        let baseline = self.values.iter().sum::<f64>() / n;
        let variance = self
            .values
            .iter()
            .map(|v| (v - baseline).powi(2))
            .sum::<f64>()
            / n;

        (baseline, baseline + variance.sqrt() * multiplier)
    }
}

/// Configuration for the baseline detector
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Rolling history capacity per metric
    pub history_size: usize,
    /// Standard deviations above the baseline before a sample is anomalous
    pub threshold_multiplier: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            history_size: DEFAULT_HISTORY_SIZE,
            threshold_multiplier: 2.0,
        }
    }
}

/// Detects per-metric deviations from rolling baselines
pub struct BaselineDetector {
    config: DetectorConfig,
    histories: HashMap<String, MetricHistory>,
}

impl BaselineDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            histories: HashMap::new(),
        }
    }

    /// Feed one sample for `metric` and evaluate it against the
    /// post-update baseline.
    ///
    /// Returns `None` during cold start (fewer than 5 samples) and for
    /// samples at or below the threshold. A finding is a pure function
    /// of the history and the input; replaying the same sequence yields
    /// the same findings.
    pub fn observe(
        &mut self,
        metric: &str,
        kind: MetricKind,
        value: f64,
        description: &str,
    ) -> Option<AnomalyFinding> {
        let history = self
            .histories
            .entry(metric.to_string())
            .or_insert_with(|| MetricHistory::new(self.config.history_size));

        history.push(value);

        if history.len() < MIN_SAMPLES_FOR_DETECTION {
            return None;
        }

        let (baseline, threshold) = history.baseline_threshold(self.config.threshold_multiplier);

        let current = match kind {
            MetricKind::Gauge => value,
            MetricKind::Counter => {
                let previous = history.previous()?;
                // Floor at zero so a wrapped or reset counter never
                // reports a negative delta.
                (value - previous).max(0.0)
            }
        };

        if current > threshold {
            Some(AnomalyFinding {
                metric: metric.to_string(),
                current,
                baseline,
                threshold,
                description: description.to_string(),
            })
        } else {
            None
        }
    }

    /// Evaluate one full metrics snapshot.
    ///
    /// Findings come back in evaluation order (CPU, RAM, disk, network
    /// receive, network send), not severity order.
    pub fn analyze(&mut self, metrics: &SystemMetrics) -> Vec<AnomalyFinding> {
        let samples: [(&str, MetricKind, f64, &str); 5] = [
            (
                "cpu_usage",
                MetricKind::Gauge,
                metrics.cpu_usage_percent,
                "CPU usage is abnormally high",
            ),
            (
                "ram_usage",
                MetricKind::Gauge,
                metrics.ram_percent(),
                "RAM usage is abnormally high",
            ),
            (
                "disk_usage",
                MetricKind::Gauge,
                metrics.disk_percent(),
                "Disk usage is abnormally high",
            ),
            (
                "network_receive",
                MetricKind::Counter,
                metrics.bytes_received as f64,
                "Network receive traffic is abnormally high",
            ),
            (
                "network_send",
                MetricKind::Counter,
                metrics.bytes_sent as f64,
                "Network send traffic is abnormally high",
            ),
        ];

        samples
            .into_iter()
            .filter_map(|(metric, kind, value, description)| {
                self.observe(metric, kind, value, description)
            })
            .collect()
    }

    /// Number of samples recorded for a metric (for diagnostics)
    pub fn history_len(&self, metric: &str) -> usize {
        self.histories.get(metric).map_or(0, MetricHistory::len)
    }
}

impl Default for BaselineDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> BaselineDetector {
        BaselineDetector::default()
    }

    #[test]
    fn test_cold_start_produces_no_findings() {
        let mut det = detector();

        for _ in 0..4 {
            let finding = det.observe("cpu_usage", MetricKind::Gauge, 99.0, "spike");
            assert!(finding.is_none());
        }
        assert_eq!(det.history_len("cpu_usage"), 4);
    }

    #[test]
    fn test_all_equal_history_threshold_equals_baseline() {
        let history = {
            let mut h = MetricHistory::new(30);
            for _ in 0..10 {
                h.push(42.0);
            }
            h
        };

        let (baseline, threshold) = history.baseline_threshold(2.0);
        assert_eq!(baseline, 42.0);
        assert_eq!(threshold, baseline);
    }

    #[test]
    fn test_sample_equal_to_baseline_never_triggers() {
        let mut det = detector();

        // Ten identical samples: threshold == baseline, comparison is
        // strict, so no finding.
        for _ in 0..10 {
            let finding = det.observe("ram_usage", MetricKind::Gauge, 50.0, "ram");
            assert!(finding.is_none());
        }
    }

    #[test]
    fn test_threshold_calculation_is_idempotent() {
        let mut history = MetricHistory::new(30);
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            history.push(v);
        }

        let first = history.baseline_threshold(2.0);
        let second = history.baseline_threshold(2.0);
        assert_eq!(first, second);
        assert!((first.0 - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_gauge_spike_detected() {
        let mut det = detector();

        for v in [10.0, 12.0, 11.0, 9.0, 10.0, 11.0] {
            assert!(det.observe("cpu_usage", MetricKind::Gauge, v, "cpu").is_none());
        }

        let finding = det
            .observe("cpu_usage", MetricKind::Gauge, 95.0, "cpu")
            .expect("spike should be flagged");
        assert_eq!(finding.metric, "cpu_usage");
        assert_eq!(finding.current, 95.0);
        assert!(finding.current > finding.threshold);
        assert!(finding.threshold > finding.baseline);
    }

    #[test]
    fn test_counter_delta_never_negative() {
        let mut det = detector();

        for v in [1000.0, 2000.0, 3000.0, 4000.0, 5000.0] {
            det.observe("network_receive", MetricKind::Counter, v, "net");
        }

        // Counter reset: current below previous must floor to zero, so
        // no finding can fire regardless of the threshold.
        let finding = det.observe("network_receive", MetricKind::Counter, 100.0, "net");
        assert!(finding.is_none());
    }

    #[test]
    fn test_counter_compares_delta_not_raw_value() {
        let mut det = detector();

        // Steady counter: raw values grow but each delta is 10, well
        // within the spread of the raw history.
        let mut total = 0.0;
        for _ in 0..20 {
            total += 10.0;
            let finding = det.observe("network_send", MetricKind::Counter, total, "net");
            assert!(finding.is_none());
        }
    }

    #[test]
    fn test_history_capacity_evicts_oldest() {
        let mut history = MetricHistory::new(3);
        for v in [1.0, 2.0, 3.0, 4.0] {
            history.push(v);
        }

        assert_eq!(history.len(), 3);
        let (baseline, _) = history.baseline_threshold(2.0);
        assert!((baseline - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_analyze_returns_findings_in_evaluation_order() {
        let mut det = detector();

        let quiet = SystemMetrics {
            cpu_usage_percent: 10.0,
            ram_total: 100,
            ram_used: 20,
            disk_total: 100,
            disk_used: 30,
            bytes_sent: 0,
            bytes_received: 0,
            packets_sent: 0,
            packets_received: 0,
            load_avg_1m: 0.1,
            load_avg_5m: 0.1,
            load_avg_15m: 0.1,
            uptime_seconds: 1,
            timestamp: String::new(),
        };

        for _ in 0..6 {
            assert!(det.analyze(&quiet).is_empty());
        }

        let mut hot = quiet.clone();
        hot.cpu_usage_percent = 99.0;
        hot.ram_used = 95;

        let findings = det.analyze(&hot);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].metric, "cpu_usage");
        assert_eq!(findings[1].metric, "ram_usage");
    }
}
