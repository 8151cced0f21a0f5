//! Ownership of every accepted socket.
//!
//! Each connection is split into a reader task, which forwards raw chunks to the
//! reactor's event queue, and a writer task, which drains an outbound queue so
//! handlers never wait on a slow peer. The outbound queue is bounded; a peer
//! that lets it fill is not reading its replies and gets dropped.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use pnum_core::types::{HostId, Role};
use pnum_wire::{encode, DecodeError, LineBuffer, Message};

use crate::context::ManagerMetrics;
use crate::error::{RegistryError, TransportError};

pub type ConnId = u64;

#[derive(Debug)]
pub enum ConnEventKind {
    Data(Bytes),
    Eof,
    Failed(std::io::Error),
}

#[derive(Debug)]
pub struct ConnEvent {
    pub conn_id: ConnId,
    pub kind: ConnEventKind,
}

#[derive(Debug)]
pub struct Connection {
    id: ConnId,
    peer: SocketAddr,
    role: Role,
    lines: LineBuffer,
    outbound: mpsc::Sender<Bytes>,
    reader: JoinHandle<()>,
    writer: JoinHandle<std::io::Result<()>>,
}

impl Connection {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Key under which this peer's throughput is recorded.
    pub fn host(&self) -> HostId {
        HostId(self.peer.ip().to_string())
    }
}

/// A connection removed from the registry whose writer may still be draining.
#[derive(Debug)]
pub struct Detached {
    peer: SocketAddr,
    role: Role,
    writer: JoinHandle<std::io::Result<()>>,
}

impl Detached {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Waits until everything queued before removal has been written and the
    /// write side shut down.
    pub async fn flushed(mut self, limit: Duration) -> Result<(), TransportError> {
        match tokio::time::timeout(limit, &mut self.writer).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(err))) => Err(TransportError::Io(err)),
            Ok(Err(join)) => Err(TransportError::WriterTask(join.to_string())),
            Err(_) => {
                self.writer.abort();
                Err(TransportError::FlushTimeout(limit))
            }
        }
    }

    /// Closes the socket now, discarding anything still queued.
    pub fn abort(self) {
        self.writer.abort();
    }
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    conns: BTreeMap<ConnId, Connection>,
    next_id: ConnId,
    events: mpsc::Sender<ConnEvent>,
    read_chunk: usize,
    max_line: usize,
    outbound_depth: usize,
    metrics: Arc<ManagerMetrics>,
}

impl ConnectionRegistry {
    pub fn new(
        events: mpsc::Sender<ConnEvent>,
        read_chunk: usize,
        max_line: usize,
        outbound_depth: usize,
        metrics: Arc<ManagerMetrics>,
    ) -> Self {
        Self {
            conns: BTreeMap::new(),
            next_id: 0,
            events,
            read_chunk: read_chunk.max(1),
            max_line,
            outbound_depth: outbound_depth.max(1),
            metrics,
        }
    }

    /// Takes ownership of `stream` and starts its reader and writer tasks.
    pub fn register(&mut self, stream: TcpStream, peer: SocketAddr) -> ConnId {
        let id = self.next_id;
        self.next_id += 1;

        let (read_half, write_half) = stream.into_split();
        let (outbound, queue) = mpsc::channel(self.outbound_depth);
        let reader = tokio::spawn(read_loop(
            id,
            read_half,
            self.read_chunk,
            self.events.clone(),
        ));
        let writer = tokio::spawn(write_loop(id, peer, write_half, queue));

        self.conns.insert(
            id,
            Connection {
                id,
                peer,
                role: Role::Unclassified,
                lines: LineBuffer::new(self.max_line),
                outbound,
                reader,
                writer,
            },
        );
        self.metrics.open_connections.inc();
        id
    }

    /// Assigns the connection's role. Allowed once per connection.
    pub fn classify(&mut self, id: ConnId, role: Role) -> Result<(), RegistryError> {
        if role == Role::Unclassified {
            return Err(RegistryError::Unclassifiable);
        }
        let conn = self
            .conns
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        if conn.role != Role::Unclassified {
            return Err(RegistryError::AlreadyClassified {
                id,
                role: conn.role,
            });
        }
        conn.role = role;
        match role {
            Role::Compute => self.metrics.compute_connections.inc(),
            Role::Monitor => self.metrics.monitor_connections.inc(),
            Role::Report | Role::Unclassified => {}
        }
        Ok(())
    }

    /// Removes the connection and stops reading from it. Anything already
    /// queued for it is still written before the socket closes.
    pub fn unregister(&mut self, id: ConnId) -> Option<Detached> {
        let conn = self.conns.remove(&id)?;
        conn.reader.abort();
        self.metrics.open_connections.dec();
        match conn.role {
            Role::Compute => self.metrics.compute_connections.dec(),
            Role::Monitor => self.metrics.monitor_connections.dec(),
            Role::Report | Role::Unclassified => {}
        }
        Some(Detached {
            peer: conn.peer,
            role: conn.role,
            writer: conn.writer,
        })
    }

    pub fn get(&self, id: ConnId) -> Option<&Connection> {
        self.conns.get(&id)
    }

    pub fn all(&self) -> impl Iterator<Item = &Connection> + '_ {
        self.conns.values()
    }

    pub fn all_of(&self, role: Role) -> Vec<ConnId> {
        self.conns
            .values()
            .filter(|c| c.role == role)
            .map(|c| c.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Appends a chunk to the connection's read buffer and returns the
    /// messages it completed. `None` if the connection is gone.
    pub fn feed(
        &mut self,
        id: ConnId,
        chunk: &[u8],
    ) -> Option<Vec<Result<Message, DecodeError>>> {
        self.conns.get_mut(&id).map(|conn| conn.lines.push(chunk))
    }

    /// Queues `msg` for the connection's writer. Does not wait for the write.
    ///
    /// Fails with `Backpressure` when the peer already has a full queue of
    /// unwritten replies.
    pub fn send(&self, id: ConnId, msg: &Message) -> Result<(), TransportError> {
        let conn = self
            .conns
            .get(&id)
            .ok_or(TransportError::UnknownConnection(id))?;
        let frame = encode(msg)?;
        conn.outbound.try_send(frame).map_err(|err| match err {
            TrySendError::Full(_) => TransportError::Backpressure {
                id,
                depth: self.outbound_depth,
            },
            TrySendError::Closed(_) => TransportError::WriterClosed(id),
        })
    }

    /// Drops every remaining connection.
    pub fn clear(&mut self) {
        let ids: Vec<ConnId> = self.conns.keys().copied().collect();
        for id in ids {
            self.unregister(id);
        }
    }
}

async fn read_loop(
    conn_id: ConnId,
    mut half: OwnedReadHalf,
    chunk: usize,
    events: mpsc::Sender<ConnEvent>,
) {
    let mut buf = vec![0u8; chunk];
    loop {
        let kind = match half.read(&mut buf).await {
            Ok(0) => ConnEventKind::Eof,
            Ok(n) => ConnEventKind::Data(Bytes::copy_from_slice(&buf[..n])),
            Err(err) => ConnEventKind::Failed(err),
        };
        let last = !matches!(kind, ConnEventKind::Data(_));
        if events.send(ConnEvent { conn_id, kind }).await.is_err() || last {
            return;
        }
    }
}

async fn write_loop(
    conn_id: ConnId,
    peer: SocketAddr,
    mut half: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Bytes>,
) -> std::io::Result<()> {
    while let Some(frame) = queue.recv().await {
        if let Err(err) = half.write_all(&frame).await {
            tracing::warn!(conn_id, %peer, error = %err, "write failed");
            return Err(err);
        }
    }
    half.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnum_wire::Body;
    use tokio::io::AsyncBufReadExt;
    use tokio::net::TcpListener;

    async fn pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (server, client, peer)
    }

    fn registry() -> (ConnectionRegistry, mpsc::Receiver<ConnEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (
            ConnectionRegistry::new(tx, 64, 1024, 2, Arc::new(ManagerMetrics::default())),
            rx,
        )
    }

    #[tokio::test]
    async fn classification_happens_once() {
        let (mut reg, _rx) = registry();
        let (server, _client, peer) = pair().await;
        let id = reg.register(server, peer);

        reg.classify(id, Role::Monitor).unwrap();
        assert_eq!(
            reg.classify(id, Role::Compute),
            Err(RegistryError::AlreadyClassified {
                id,
                role: Role::Monitor
            })
        );
        assert_eq!(reg.all_of(Role::Monitor), vec![id]);
        assert!(reg.all_of(Role::Compute).is_empty());
        assert_eq!(reg.metrics.monitor_connections.get(), 1);
    }

    #[tokio::test]
    async fn reads_arrive_as_events_and_eof_is_reported() {
        let (mut reg, mut rx) = registry();
        let (server, mut client, peer) = pair().await;
        let id = reg.register(server, peer);

        client.write_all(b"hello").await.unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.conn_id, id);
        assert!(matches!(ev.kind, ConnEventKind::Data(ref b) if &b[..] == b"hello"));

        drop(client);
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev.kind, ConnEventKind::Eof));
    }

    #[tokio::test]
    async fn unregister_flushes_queued_frames_then_closes() {
        let (mut reg, _rx) = registry();
        let (server, client, peer) = pair().await;
        let id = reg.register(server, peer);

        reg.send(id, &Message::manager(Body::Kill)).unwrap();
        let detached = reg.unregister(id).unwrap();
        detached.flushed(Duration::from_secs(5)).await.unwrap();
        assert!(reg.is_empty());
        assert_eq!(reg.metrics.open_connections.get(), 0);

        let mut lines = tokio::io::BufReader::new(client).lines();
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("{\"orig\":\"man\",\"type\":\"kill\"}")
        );
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn full_outbound_queue_is_backpressure() {
        let (mut reg, _rx) = registry();
        let (server, client, peer) = pair().await;
        let id = reg.register(server, peer);

        // The writer cannot run between these sends, so nothing drains.
        let status = Message::manager(Body::Ack { flops: None });
        reg.send(id, &status).unwrap();
        reg.send(id, &status).unwrap();
        let err = reg.send(id, &status).unwrap_err();
        assert!(matches!(
            err,
            TransportError::Backpressure { id: got, depth: 2 } if got == id
        ));

        reg.unregister(id).unwrap().abort();
        let mut lines = tokio::io::BufReader::new(client).lines();
        let end = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap();
        assert!(!matches!(end, Ok(Some(_))), "aborted connection wrote {end:?}");
    }

    #[tokio::test]
    async fn send_to_unknown_connection_fails() {
        let (reg, _rx) = registry();
        let err = reg.send(7, &Message::manager(Body::Kill)).unwrap_err();
        assert!(matches!(err, TransportError::UnknownConnection(7)));
    }
}
