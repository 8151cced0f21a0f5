use std::time::Duration;

use pnum_core::types::Role;
use pnum_wire::{EncodeError, Origin};
use thiserror::Error;

use crate::registry::ConnId;

/// Failure moving bytes to or from one peer. Never fatal to the manager.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnId),
    #[error("connection {0} can no longer be written to")]
    WriterClosed(ConnId),
    #[error("connection {id} has {depth} unwritten replies queued; peer is not reading")]
    Backpressure { id: ConnId, depth: usize },
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("writer task failed: {0}")]
    WriterTask(String),
    #[error("outbound queue not flushed within {0:?}")]
    FlushTimeout(Duration),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnId),
    #[error("connection {id} is already classified as {role}")]
    AlreadyClassified { id: ConnId, role: Role },
    #[error("connections cannot be classified back to unclassified")]
    Unclassifiable,
}

/// Per-message failure. Logged and skipped; the connection stays open.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("unexpected `{kind}` from {origin} on a {role} connection")]
    ProtocolViolation {
        role: Role,
        origin: Origin,
        kind: &'static str,
    },
    #[error("work request carries no throughput")]
    MissingThroughput,
}
