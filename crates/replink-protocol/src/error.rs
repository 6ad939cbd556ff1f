//! Error types for the REPL protocol.

use thiserror::Error;

/// Errors produced by the field-level reply parsers.
///
/// The top-level decoders never surface these to callers — a reply that
/// fails to parse decodes to an explicit unparseable value instead, because
/// noise on the serial line is expected rather than exceptional.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to parse a reply field.
    #[error("failed to parse reply: {0}")]
    ParseError(String),

    /// A reply did not carry the marker expected for the issued command.
    #[error("expected marker {marker:?} absent from reply")]
    MissingMarker {
        /// The marker that was looked for.
        marker: String,
    },
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
