#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, info_span, Instrument};

use pnum_report::{render, ReportClient, DEFAULT_TIMEOUT};

#[derive(Debug, Parser)]
#[command(name = "pnum-report")]
#[command(about = "Print manager status; optionally shut the search down")]
struct Args {
    /// Manager address.
    #[arg(long, env = "PNUM_MANAGER_ADDR", default_value = "localhost:44479")]
    manager: String,

    /// After reporting, tell the manager to kill all monitors and exit.
    #[arg(short = 'k', long)]
    kill: bool,

    /// Give up on the manager after this long.
    #[arg(long, env = "PNUM_REPORT_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT.as_millis() as u64)]
    timeout_ms: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    pnum_observe::logging::init_tracing();
    let args = Args::parse();

    let span = info_span!("pnum-report", manager = %args.manager, kill = args.kill);
    async move {
        let timeout = Duration::from_millis(args.timeout_ms);
        let mut client = ReportClient::connect(&args.manager, timeout)
            .await
            .with_context(|| format!("connecting to manager at {}", args.manager))?;
        let snapshot = client.status().await.context("fetching status")?;
        print!("{}", render(&snapshot));

        if args.kill {
            client.kill().await.context("sending kill")?;
            info!("kill sent");
        }
        Ok(())
    }
    .instrument(span)
    .await
}
