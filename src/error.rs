/// Error types shared across the match runner, drivers and broadcast server
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::rules::Side;

/// Failure of a move driver (engine process, protocol or timing)
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("failed to spawn engine `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("engine did not return a move")]
    NoMove,

    #[error("engine replied with unplayable move {mv}")]
    IllegalMove { mv: String },

    #[error("engine did not answer within {0:?}")]
    Timeout(Duration),

    #[error("engine process exited")]
    Exited,
}

/// Errors that end a match early
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("{side} driver failed: {source}")]
    Driver {
        side: Side,
        #[source]
        source: DriverError,
    },

    #[error("{side} played an illegal move {mv}: {reason}")]
    IllegalMove {
        side: Side,
        mv: String,
        reason: String,
    },

    #[error("rules engine inconsistency: {0}")]
    InternalInconsistency(String),

    #[error("live broadcast unavailable: {0}")]
    Broadcast(#[from] BroadcastError),
}

/// Errors raised by the live broadcast server
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode broadcast message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broadcast server is closed")]
    Closed,

    #[error("broadcast server did not drain within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("broadcast server task failed: {0}")]
    Task(String),

    #[error("broadcast server stopped serving: {0}")]
    Serve(String),
}

/// Errors of the terminal viewer
#[derive(Debug, Error)]
pub enum ViewerError {
    #[error("websocket failure: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("undecodable broadcast message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("viewer out of sync: {0}")]
    Desync(String),
}

/// Errors loading or validating a match configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid match file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid match configuration: {0}")]
    Invalid(String),
}
