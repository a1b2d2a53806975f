use thiserror::Error;

use crate::wire::CodecError;

/// Unified error type for the manet workspace.
#[derive(Error, Debug)]
pub enum ManetError {
    // ── Wire / transport errors ────────────────────────────────
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("connection closed before a full packet arrived: {0}")]
    ConnectionClosed(String),

    // ── Registry errors ────────────────────────────────────────
    #[error("registry error: {0}")]
    Registry(String),

    // ── Config errors ──────────────────────────────────────────
    #[error("config error: {0}")]
    Config(String),

    // ── Simulation errors ──────────────────────────────────────
    #[error("simulation did not quiesce within {limit} deliveries")]
    NoQuiescence { limit: usize },

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("node task failed: {0}")]
    Task(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ManetError>;
