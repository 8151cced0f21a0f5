use tracing_subscriber::EnvFilter;

/// Initializes a `tracing_subscriber` using `PNUM_LOG` first, then `RUST_LOG`, then a default.
///
/// Log field contract for pnum processes:
/// - Include `conn_id` and `peer` on every per-connection event.
/// - Include `role` once a connection has completed its handshake.
/// - Include `start` and `end` on any range assignment.
pub fn init_tracing() {
    let filter = env_filter();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("PNUM_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}
