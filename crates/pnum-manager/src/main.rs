#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use pnum_core::alloc::{AllocPolicy, DEFAULT_MAX_SPAN};
use pnum_manager::config::{
    DEFAULT_BACKLOG, DEFAULT_BIND, DEFAULT_CEILING, DEFAULT_OUTBOUND_QUEUE_DEPTH,
    DEFAULT_READ_CHUNK_BYTES,
};
use pnum_manager::context::emit_metrics_snapshot;
use pnum_manager::shutdown::install_signal_handlers;
use pnum_manager::{Manager, ManagerConfig};
use pnum_wire::codec::DEFAULT_MAX_LINE_BYTES;

#[derive(Debug, Parser)]
#[command(name = "pnum-manager")]
#[command(about = "Hands out perfect-number search ranges and collects results")]
struct Args {
    /// Address to listen on.
    #[arg(long, env = "PNUM_BIND_ADDR", default_value = DEFAULT_BIND)]
    bind: String,

    /// Listen backlog.
    #[arg(long, env = "PNUM_BACKLOG", default_value_t = DEFAULT_BACKLOG)]
    backlog: u32,

    /// Largest candidate ever assigned.
    #[arg(long, env = "PNUM_CEILING", default_value_t = DEFAULT_CEILING)]
    ceiling: u64,

    /// Seconds of work one range should represent for the requesting worker.
    #[arg(long, env = "PNUM_TIME_BUDGET_SECS", default_value_t = 30.0)]
    time_budget_secs: f64,

    /// Converts reported flops into an iteration budget.
    #[arg(long, env = "PNUM_CALIBRATION", default_value_t = 0.001)]
    calibration: f64,

    /// Upper bound on candidates in a single range.
    #[arg(long, env = "PNUM_MAX_RANGE_SPAN", default_value_t = DEFAULT_MAX_SPAN)]
    max_range_span: u64,

    /// Bytes read from one socket per readiness event.
    #[arg(long, env = "PNUM_READ_CHUNK_BYTES", default_value_t = DEFAULT_READ_CHUNK_BYTES)]
    read_chunk_bytes: usize,

    /// Longest unterminated line kept before it is discarded.
    #[arg(long, env = "PNUM_MAX_LINE_BYTES", default_value_t = DEFAULT_MAX_LINE_BYTES)]
    max_line_bytes: usize,

    /// Replies queued for one peer before it is dropped as stalled.
    #[arg(long, env = "PNUM_OUTBOUND_QUEUE_DEPTH", default_value_t = DEFAULT_OUTBOUND_QUEUE_DEPTH)]
    outbound_queue_depth: usize,

    /// How long the kill broadcast waits for each monitor's socket to drain.
    #[arg(long, env = "PNUM_KILL_FLUSH_TIMEOUT_MS", default_value_t = 2_000)]
    kill_flush_timeout_ms: u64,

    /// Optional: periodically emit a metrics snapshot to logs (0 disables).
    #[arg(long, env = "PNUM_METRICS_SNAPSHOT_INTERVAL_MS", default_value_t = 0)]
    metrics_snapshot_interval_ms: u64,
}

impl Args {
    fn into_config(self) -> Result<ManagerConfig> {
        if self.ceiling < 2 {
            anyhow::bail!("PNUM_CEILING must be >= 2");
        }
        if !(self.time_budget_secs.is_finite() && self.time_budget_secs > 0.0) {
            anyhow::bail!("PNUM_TIME_BUDGET_SECS must be a positive number");
        }
        if !(self.calibration.is_finite() && self.calibration > 0.0) {
            anyhow::bail!("PNUM_CALIBRATION must be a positive number");
        }
        if self.max_range_span == 0 {
            anyhow::bail!("PNUM_MAX_RANGE_SPAN must be > 0");
        }
        if self.read_chunk_bytes == 0 {
            anyhow::bail!("PNUM_READ_CHUNK_BYTES must be > 0");
        }
        if self.outbound_queue_depth == 0 {
            anyhow::bail!("PNUM_OUTBOUND_QUEUE_DEPTH must be > 0");
        }

        Ok(ManagerConfig {
            bind: self.bind,
            backlog: self.backlog,
            ceiling: self.ceiling,
            policy: AllocPolicy {
                time_budget_secs: self.time_budget_secs,
                calibration: self.calibration,
                max_span: self.max_range_span,
            },
            read_chunk_bytes: self.read_chunk_bytes,
            max_line_bytes: self.max_line_bytes,
            outbound_queue_depth: self.outbound_queue_depth,
            kill_flush_timeout: Duration::from_millis(self.kill_flush_timeout_ms),
            metrics_snapshot_interval: (self.metrics_snapshot_interval_ms > 0)
                .then(|| Duration::from_millis(self.metrics_snapshot_interval_ms)),
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    pnum_observe::logging::init_tracing();

    let args = Args::parse();
    let config = args.into_config()?;

    let span = info_span!(
        "pnum-manager",
        bind = %config.bind,
        ceiling = config.ceiling,
        time_budget_secs = config.policy.time_budget_secs,
        calibration = config.policy.calibration
    );
    async move {
        info!("starting manager");
        let snapshot_interval = config.metrics_snapshot_interval;
        let manager = Manager::bind(config).await?;

        let shutdown = CancellationToken::new();
        let _signals = install_signal_handlers(shutdown.clone())?;

        if let Some(interval) = snapshot_interval {
            let metrics = manager.metrics();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    emit_metrics_snapshot(&metrics);
                }
            });
        }

        let outcome = manager.run(shutdown).await?;
        info!(
            reason = ?outcome.reason,
            monitors_killed = outcome.kill.delivered,
            monitors_unkilled = outcome.kill.unkilled,
            "manager exiting"
        );
        Ok(())
    }
    .instrument(span)
    .await
}
