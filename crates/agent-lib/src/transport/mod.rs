//! Transport to the remote collector
//!
//! This module provides:
//! - The resilient transport client owning the single outbound
//!   connection and its reconnect state machine
//! - A TCP implementation sending newline-delimited JSON envelopes
//! - The durable subscribe-once ledger

mod client;
mod ledger;
mod tcp;

pub use client::{ClientConfig, ConnectionState, TransportClient};
pub use ledger::SubscribeLedger;
pub use tcp::TcpTransport;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors surfaced by a transport implementation
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid collector uri: {0}")]
    InvalidUri(String),

    #[error("session is closed")]
    SessionClosed,
}

/// Why a session ended without an explicit local close
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote side closed the connection
    RemoteClosed,
    /// The read side failed
    ReadError(String),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::RemoteClosed => write!(f, "remote closed the connection"),
            CloseReason::ReadError(e) => write!(f, "read failed: {e}"),
        }
    }
}

/// Write side of an open session
#[async_trait]
pub trait TransportSink: Send {
    /// Send one framed message
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Close the write side; best effort
    async fn shutdown(&mut self);
}

/// One open session: a sink for outbound frames plus a signal that
/// fires when the session dies from the remote side
pub struct Session {
    pub sink: Box<dyn TransportSink>,
    pub closed: oneshot::Receiver<CloseReason>,
}

/// Factory for sessions toward the collector.
///
/// The seam exists so tests can drive the client with fake transports;
/// production uses [`TcpTransport`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self) -> Result<Session, TransportError>;
}
