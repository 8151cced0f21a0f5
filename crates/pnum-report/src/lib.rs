#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

//! One-shot status client for the manager.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use pnum_core::types::StatusSnapshot;
use pnum_wire::{encode, Body, ConvertError, EncodeError, Message, Origin, TryToCore};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("manager closed the connection")]
    Closed,
    #[error("timed out after {0:?} waiting for the manager")]
    Timeout(Duration),
    #[error("undecodable reply {line:?}: {source}")]
    Decode {
        line: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("expected a greeting from the manager, got `{kind}` from {origin}")]
    BadGreeting { origin: Origin, kind: &'static str },
    #[error(transparent)]
    Convert(#[from] ConvertError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

pub struct ReportClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
    timeout: Duration,
}

impl ReportClient {
    /// Connects, waits for the manager's greeting and identifies as a report client.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, ReportError> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ReportError::Timeout(timeout))??;
        let (read, write) = stream.into_split();
        let mut client = Self {
            lines: BufReader::new(read).lines(),
            write,
            timeout,
        };

        let greeting = client.recv().await?;
        if !matches!(
            greeting,
            Message {
                origin: Origin::Manager,
                body: Body::Ack { .. }
            }
        ) {
            return Err(ReportError::BadGreeting {
                origin: greeting.origin,
                kind: greeting.kind(),
            });
        }
        client.send(Body::Ack { flops: None }).await?;
        Ok(client)
    }

    pub async fn status(&mut self) -> Result<StatusSnapshot, ReportError> {
        self.send(Body::Req { flops: None }).await?;
        loop {
            let reply = self.recv().await?;
            match reply.body {
                Body::Dat { .. } => {
                    return Ok(TryToCore::<StatusSnapshot>::try_to_core(&reply.body)?)
                }
                other => tracing::debug!(kind = other.kind(), "ignoring unrelated message"),
            }
        }
    }

    /// Orders the manager to kill every monitor and exit. Consumes the client.
    pub async fn kill(mut self) -> Result<(), ReportError> {
        self.send(Body::Kill).await?;
        self.write.shutdown().await?;
        Ok(())
    }

    async fn send(&mut self, body: Body) -> Result<(), ReportError> {
        let frame = encode(&Message::report(body))?;
        self.write.write_all(&frame).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Message, ReportError> {
        let line = tokio::time::timeout(self.timeout, self.lines.next_line())
            .await
            .map_err(|_| ReportError::Timeout(self.timeout))??
            .ok_or(ReportError::Closed)?;
        serde_json::from_str(&line).map_err(|source| ReportError::Decode { line, source })
    }
}

/// Human-readable rendering of a snapshot.
pub fn render(snapshot: &StatusSnapshot) -> String {
    let mut out = String::new();
    out.push_str(&format!("compute clients ({}):\n", snapshot.clients.len()));
    for (host, flops) in &snapshot.clients {
        out.push_str(&format!("  {host:<24} {flops:>16.0} flops\n"));
    }
    out.push_str(&format!("perfect numbers ({}):\n", snapshot.discovered.len()));
    for value in &snapshot.discovered {
        out.push_str(&format!("  {value}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnum_core::types::HostId;

    #[test]
    fn render_lists_clients_then_values() {
        let mut snap = StatusSnapshot::default();
        snap.clients.insert(HostId("10.0.0.2".into()), 1500.0);
        snap.discovered = vec![6, 28];

        let text = render(&snap);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "compute clients (1):");
        assert!(lines[1].contains("10.0.0.2"));
        assert!(lines[1].contains("1500"));
        assert_eq!(lines[2], "perfect numbers (2):");
        assert_eq!(lines[3].trim(), "6");
        assert_eq!(lines[4].trim(), "28");
    }
}
