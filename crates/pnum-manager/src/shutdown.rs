use std::time::Duration;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pnum_core::types::Role;
use pnum_wire::{Body, Message};

use crate::registry::ConnectionRegistry;

/// Outcome of one kill broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KillReport {
    pub delivered: usize,
    pub unkilled: usize,
}

#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    flush_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(flush_timeout: Duration) -> Self {
        Self { flush_timeout }
    }

    /// Sends `kill` to every monitor and removes them from the registry.
    ///
    /// Sends are independent: a monitor that cannot be reached is logged and
    /// skipped. No reply is awaited, only the local write.
    pub async fn broadcast_kill(&self, registry: &mut ConnectionRegistry) -> KillReport {
        let kill = Message::manager(Body::Kill);
        let mut report = KillReport::default();
        let mut flushing = JoinSet::new();

        for id in registry.all_of(Role::Monitor) {
            let sent = registry.send(id, &kill);
            let Some(detached) = registry.unregister(id) else {
                continue;
            };
            let peer = detached.peer();
            match sent {
                Ok(()) => {
                    let limit = self.flush_timeout;
                    flushing.spawn(async move { (peer, detached.flushed(limit).await) });
                }
                Err(err) => {
                    warn!(conn_id = id, %peer, error = %err, "monitor left unkilled");
                    report.unkilled += 1;
                    detached.abort();
                }
            }
        }

        while let Some(joined) = flushing.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((peer, Err(err))) => {
                    warn!(%peer, error = %err, "monitor left unkilled");
                    report.unkilled += 1;
                }
                Err(err) => {
                    warn!(error = %err, "kill delivery task failed; monitor left unkilled");
                    report.unkilled += 1;
                }
            }
        }

        info!(
            delivered = report.delivered,
            unkilled = report.unkilled,
            "kill broadcast complete"
        );
        report
    }
}

/// Cancels `token` on SIGHUP, SIGINT or SIGQUIT.
#[cfg(unix)]
pub fn install_signal_handlers(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut quit = signal(SignalKind::quit())?;

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = hangup.recv() => "SIGHUP",
            _ = interrupt.recv() => "SIGINT",
            _ = quit.recv() => "SIGQUIT",
            _ = token.cancelled() => return,
        };
        info!(signal = name, "termination signal received");
        token.cancel();
    }))
}

#[cfg(not(unix))]
pub fn install_signal_handlers(token: CancellationToken) -> std::io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(err) = res {
                    warn!(error = %err, "ctrl-c handler failed");
                    return;
                }
            }
            _ = token.cancelled() => return,
        }
        info!(signal = "ctrl-c", "termination signal received");
        token.cancel();
    }))
}
