//! The manager's event loop.
//!
//! One `select!` waits on the shutdown token, the listener and the event queue
//! fed by every connection's reader task. Everything after the wait runs to
//! completion on this task, so manager state needs no locking.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pnum_core::types::Role;
use pnum_wire::{Body, Message, Origin, ToWire};

use crate::config::ManagerConfig;
use crate::context::{ManagerContext, ManagerMetrics};
use crate::error::{HandlerError, TransportError};
use crate::registry::{ConnEvent, ConnEventKind, ConnId, ConnectionRegistry};
use crate::shutdown::{KillReport, ShutdownCoordinator};

const EVENT_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The shutdown token was cancelled, normally by a termination signal.
    Signal,
    /// A report client sent `kill`.
    ReportKill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOutcome {
    pub reason: ShutdownReason,
    pub kill: KillReport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Kill,
}

pub struct Manager {
    listener: TcpListener,
    ctx: ManagerContext,
    registry: ConnectionRegistry,
    events: mpsc::Receiver<ConnEvent>,
    metrics: Arc<ManagerMetrics>,
    shutdown: ShutdownCoordinator,
}

impl Manager {
    /// Binds the listening socket with address reuse and the configured backlog.
    pub async fn bind(config: ManagerConfig) -> Result<Self> {
        let listener = listen(&config.bind, config.backlog).await?;
        let metrics = Arc::new(ManagerMetrics::default());
        let (events_tx, events) = mpsc::channel(EVENT_QUEUE_DEPTH);

        Ok(Self {
            listener,
            ctx: ManagerContext::new(config.ceiling, config.policy, metrics.clone()),
            registry: ConnectionRegistry::new(
                events_tx,
                config.read_chunk_bytes,
                config.max_line_bytes,
                config.outbound_queue_depth,
                metrics.clone(),
            ),
            events,
            metrics,
            shutdown: ShutdownCoordinator::new(config.kill_flush_timeout),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn metrics(&self) -> Arc<ManagerMetrics> {
        self.metrics.clone()
    }

    /// Serves until `shutdown` is cancelled or a report client orders a kill.
    /// Either way every monitor is sent `kill` before this returns.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<RunOutcome> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    return Ok(self.terminate(ShutdownReason::Signal).await);
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.on_accept(stream, peer),
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                Some(event) = self.events.recv() => {
                    if self.on_event(event) == Flow::Kill {
                        return Ok(self.terminate(ShutdownReason::ReportKill).await);
                    }
                }
            }
        }
    }

    async fn terminate(&mut self, reason: ShutdownReason) -> RunOutcome {
        info!(?reason, "shutting down");
        let kill = self.shutdown.broadcast_kill(&mut self.registry).await;
        self.registry.clear();
        RunOutcome { reason, kill }
    }

    fn on_accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        self.metrics.accepted_total.inc();
        let id = self.registry.register(stream, peer);
        debug!(conn_id = id, %peer, "connection accepted");
        if let Err(err) = self
            .registry
            .send(id, &Message::manager(Body::Ack { flops: None }))
        {
            warn!(conn_id = id, %peer, error = %err, "greeting failed; dropping connection");
            self.registry.unregister(id);
        }
    }

    fn on_event(&mut self, event: ConnEvent) -> Flow {
        let id = event.conn_id;
        match event.kind {
            ConnEventKind::Data(chunk) => {
                let Some(results) = self.registry.feed(id, &chunk) else {
                    return Flow::Continue;
                };
                for result in results {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(err) => {
                            self.metrics.decode_errors_total.inc();
                            warn!(conn_id = id, error = %err, "skipping undecodable message");
                            continue;
                        }
                    };
                    match self.dispatch(id, msg) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Kill) => return Flow::Kill,
                        Err(HandlerError::Transport(err @ TransportError::Backpressure { .. })) => {
                            self.drop_stalled(id, &err);
                            return Flow::Continue;
                        }
                        Err(err) => {
                            if matches!(err, HandlerError::ProtocolViolation { .. }) {
                                self.metrics.protocol_violations_total.inc();
                            }
                            warn!(conn_id = id, error = %err, "skipping message");
                        }
                    }
                }
            }
            ConnEventKind::Eof => self.close(id, "peer closed"),
            ConnEventKind::Failed(err) => {
                warn!(conn_id = id, error = %err, "read failed");
                self.close(id, "read error");
            }
        }
        Flow::Continue
    }

    fn close(&mut self, id: ConnId, why: &'static str) {
        if let Some(detached) = self.registry.unregister(id) {
            info!(
                conn_id = id,
                peer = %detached.peer(),
                role = %detached.role(),
                reason = why,
                "connection closed"
            );
        }
    }

    /// Drops a peer that stopped reading, discarding the replies queued for it.
    fn drop_stalled(&mut self, id: ConnId, err: &TransportError) {
        if let Some(detached) = self.registry.unregister(id) {
            self.metrics.stalled_peers_dropped_total.inc();
            warn!(
                conn_id = id,
                peer = %detached.peer(),
                role = %detached.role(),
                error = %err,
                "dropping stalled peer"
            );
            detached.abort();
        }
    }

    fn dispatch(&mut self, id: ConnId, msg: Message) -> Result<Flow, HandlerError> {
        let role = self
            .registry
            .get(id)
            .map(|c| c.role())
            .ok_or(TransportError::UnknownConnection(id))?;
        match role {
            Role::Unclassified => self.handshake(id, msg),
            Role::Compute => self.on_compute(id, msg),
            Role::Report => self.on_report(id, msg),
            Role::Monitor => {
                debug!(conn_id = id, kind = msg.kind(), "ignoring message from monitor");
                Ok(Flow::Continue)
            }
        }
    }

    fn handshake(&mut self, id: ConnId, msg: Message) -> Result<Flow, HandlerError> {
        let peer = self.peer_of(id);
        match (msg.origin, msg.body) {
            (Origin::Compute, Body::Ack { flops }) => {
                self.registry.classify(id, Role::Compute)?;
                info!(
                    conn_id = id,
                    host = %peer.ip(),
                    port = peer.port(),
                    flops = ?flops,
                    "compute worker joined"
                );
            }
            (Origin::Monitor, Body::Ack { .. }) => {
                self.registry.classify(id, Role::Monitor)?;
                info!(conn_id = id, %peer, "monitor joined");
            }
            (Origin::Report, Body::Ack { .. }) => {
                self.registry.classify(id, Role::Report)?;
                debug!(conn_id = id, %peer, "report client connected");
            }
            // A report client may skip its own ack and lead with the request.
            (Origin::Report, body) => {
                self.registry.classify(id, Role::Report)?;
                return self.on_report(id, Message::report(body));
            }
            (origin, body) => {
                return Err(HandlerError::ProtocolViolation {
                    role: Role::Unclassified,
                    origin,
                    kind: body.kind(),
                });
            }
        }
        Ok(Flow::Continue)
    }

    fn on_compute(&mut self, id: ConnId, msg: Message) -> Result<Flow, HandlerError> {
        match msg.body {
            Body::Req { flops: Some(flops) } => {
                let host = self
                    .registry
                    .get(id)
                    .map(|c| c.host())
                    .ok_or(TransportError::UnknownConnection(id))?;
                if flops.is_nan() || flops <= 0.0 {
                    debug!(conn_id = id, flops, "non-positive throughput; single-candidate range");
                }
                let reply = match self.ctx.assign(host, flops) {
                    Some(range) => {
                        info!(
                            conn_id = id,
                            start = range.start,
                            end = range.end,
                            flops,
                            "range assigned"
                        );
                        range.to_wire()
                    }
                    None => {
                        warn!(conn_id = id, ceiling = self.ctx.ceiling(), "search space exhausted");
                        Body::EXHAUSTED_RANGE
                    }
                };
                self.registry.send(id, &Message::manager(reply))?;
            }
            Body::Req { flops: None } => return Err(HandlerError::MissingThroughput),
            Body::Add { val } => {
                if self.ctx.record_discovery(val) {
                    info!(conn_id = id, value = val, "discovery recorded");
                } else {
                    debug!(conn_id = id, value = val, "duplicate discovery");
                }
            }
            Body::Ack { .. } => debug!(conn_id = id, "repeated handshake ignored"),
            body => {
                return Err(HandlerError::ProtocolViolation {
                    role: Role::Compute,
                    origin: msg.origin,
                    kind: body.kind(),
                })
            }
        }
        Ok(Flow::Continue)
    }

    fn on_report(&mut self, id: ConnId, msg: Message) -> Result<Flow, HandlerError> {
        match msg.body {
            Body::Req { .. } => {
                let snapshot = self.ctx.snapshot();
                debug!(
                    conn_id = id,
                    clients = snapshot.clients.len(),
                    discovered = snapshot.discovered.len(),
                    "serving status"
                );
                self.registry
                    .send(id, &Message::manager(snapshot.to_wire()))?;
                Ok(Flow::Continue)
            }
            Body::Kill => {
                info!(conn_id = id, peer = %self.peer_of(id), "kill requested by report client");
                Ok(Flow::Kill)
            }
            Body::Ack { .. } => Ok(Flow::Continue),
            body => Err(HandlerError::ProtocolViolation {
                role: Role::Report,
                origin: msg.origin,
                kind: body.kind(),
            }),
        }
    }

    fn peer_of(&self, id: ConnId) -> SocketAddr {
        self.registry
            .get(id)
            .map(|c| c.peer())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)))
    }
}

async fn listen(bind: &str, backlog: u32) -> Result<TcpListener> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host(bind)
        .await
        .with_context(|| format!("resolving {bind}"))?
        .collect();
    let addr = addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .with_context(|| format!("{bind} resolved to no addresses"))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket
        .bind(addr)
        .with_context(|| format!("binding {addr}"))?;
    let listener = socket.listen(backlog)?;
    info!(addr = %listener.local_addr()?, backlog, "listening");
    Ok(listener)
}
