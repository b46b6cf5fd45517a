//! Error types for the glitch orchestration engine.

use std::io;
use thiserror::Error;

/// Result type alias for orchestration operations.
pub type Result<T> = std::result::Result<T, GlitchError>;

/// Errors raised by the transports, the loops and the configuration layer.
#[derive(Error, Debug)]
pub enum GlitchError {
    /// Serial device could not be claimed (in use, missing, permission denied)
    #[error("could not open serial port {port}: {source}")]
    Connection {
        /// Port that failed to open
        port: String,
        #[source]
        source: io::Error,
    },

    /// Write, flush or read failure on an open connection
    #[error("serial transfer on {port} failed: {source}")]
    Transport {
        /// Port the transfer was running on
        port: String,
        #[source]
        source: io::Error,
    },

    /// Line from the victim board that could not be decoded
    #[error("undecodable victim line: {0}")]
    ProtocolMismatch(String),

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Background thread could not be spawned
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        /// Thread name
        name: String,
        #[source]
        source: io::Error,
    },

    /// Background thread ended with a panic
    #[error("{0} thread panicked")]
    WorkerPanicked(String),
}
