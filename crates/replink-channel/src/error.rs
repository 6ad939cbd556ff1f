//! Error types for the command channel.

use thiserror::Error;

/// Errors at the transport boundary (open/read/write on the serial link).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening the port failed (absent device, permissions, busy port).
    #[error("cannot open port {port}: {source}")]
    Open {
        /// The port that was requested.
        port: String,
        /// The underlying driver error.
        #[source]
        source: serialport::Error,
    },

    /// A read or write on the open port failed.
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The transport failed. Never retried automatically.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An operation that requires a connection was called without one.
    #[error("channel is not connected")]
    NotConnected,

    /// A direct receive was attempted on a streaming-mode channel, whose
    /// reads belong to the background worker.
    #[error("operation requires polling mode")]
    WrongMode,
}

/// Result type alias for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;
