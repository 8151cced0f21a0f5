#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod context;
pub mod error;
pub mod reactor;
pub mod registry;
pub mod shutdown;

pub use config::ManagerConfig;
pub use reactor::{Manager, RunOutcome, ShutdownReason};
