//! Anomaly and threat detection
//!
//! This module provides:
//! - Baseline anomaly detection over rolling per-metric histories
//! - Threat correlation over sliding per-actor windows

mod baseline;
mod threat;

pub use baseline::{BaselineDetector, DetectorConfig, MetricHistory, MetricKind};
pub use threat::{ThreatConfig, ThreatEngine};
