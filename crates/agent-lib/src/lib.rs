//! Agent library for host telemetry and threat detection
//!
//! This crate provides the core functionality for:
//! - System, log and security event collection
//! - Statistical baseline anomaly detection
//! - Sliding-window threat correlation
//! - Resilient delivery to the collector service

pub mod anomaly;
pub mod collector;
pub mod models;
pub mod transport;

pub use models::*;
