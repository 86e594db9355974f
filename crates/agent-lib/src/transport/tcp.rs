//! TCP transport sending newline-delimited JSON frames
//!
//! Each session splits the stream: the write half becomes the sink,
//! and a reader task owns the read half, handling inbound collector
//! frames and signalling the client when the remote side goes away.

use super::{CloseReason, Session, Transport, TransportError, TransportSink};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

/// Transport over a plain TCP stream
pub struct TcpTransport {
    addr: String,
}

impl TcpTransport {
    /// Accepts `tcp://host:port` or a bare `host:port`
    pub fn new(uri: &str) -> Result<Self, TransportError> {
        let addr = uri.strip_prefix("tcp://").unwrap_or(uri);

        if addr.is_empty() || !addr.contains(':') {
            return Err(TransportError::InvalidUri(uri.to_string()));
        }

        Ok(Self {
            addr: addr.to_string(),
        })
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self) -> Result<Session, TransportError> {
        let stream = TcpStream::connect(&self.addr).await?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let (closed_tx, closed_rx) = oneshot::channel();

        tokio::spawn(read_loop(read_half, closed_tx));

        Ok(Session {
            sink: Box::new(TcpSink { writer: write_half }),
            closed: closed_rx,
        })
    }
}

struct TcpSink {
    writer: OwnedWriteHalf,
}

#[async_trait]
impl TransportSink for TcpSink {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.writer.write_all(frame.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "error shutting down write half");
        }
    }
}

/// Read inbound frames until the stream ends, then report why
async fn read_loop(read_half: OwnedReadHalf, closed_tx: oneshot::Sender<CloseReason>) {
    let mut lines = BufReader::new(read_half).lines();

    let reason = loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch_inbound(&line),
            Ok(None) => break CloseReason::RemoteClosed,
            Err(e) => break CloseReason::ReadError(e.to_string()),
        }
    };

    // The receiver may already be gone after an explicit close.
    let _ = closed_tx.send(reason);
}

fn dispatch_inbound(line: &str) {
    let frame: serde_json::Value = match serde_json::from_str(line) {
        Ok(frame) => frame,
        Err(e) => {
            error!(error = %e, "discarding malformed inbound frame");
            return;
        }
    };

    let event = frame["event"].as_str().unwrap_or("unknown");
    debug!(event, "received message");

    if event == "command" {
        handle_command(&frame);
    }
}

/// Commands from the collector; recognized but not yet acted on
fn handle_command(frame: &serde_json::Value) {
    match frame["command"].as_str() {
        Some("restart") => info!("received restart command"),
        Some("update") => info!("received update command"),
        other => warn!(command = ?other, "unknown command"),
    }
}
