use std::time::Duration;

use crate::status_code::StatusCode;

/// Errors produced by the transport layer.
///
/// During the handshake these are returned to the caller of the pending operation;
///  after the handshake they travel in [`TransportEvent`](crate::transport::TransportEvent)
///  notifications since there is no longer a single caller to report to.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A chunk header with out-of-range fields or too few bytes. Fatal for the connection.
    #[error("malformed chunk header: {0}")]
    MalformedHeader(String),

    /// A handshake message payload that could not be decoded.
    #[error("malformed handshake message: {0}")]
    MalformedMessage(String),

    /// A chunk whose declared length exceeds the configured maximum.
    #[error("chunk of {size} bytes exceeds the maximum of {max} (BadTcpMessageTooLarge)")]
    ChunkTooLarge { size: u32, max: u32 },

    /// An unexpected message type for the current handshake state.
    #[error("{status}: {reason}")]
    ProtocolSequence { status: StatusCode, reason: String },

    /// A handshake message violating the stated field limits.
    #[error("{status}: {reason}")]
    Validation { status: StatusCode, reason: String },

    /// The peer answered the handshake with an `ERR` chunk.
    #[error("{status} received from peer: {reason}")]
    Rejected { status: StatusCode, reason: String },

    /// No response within the configured wait duration.
    #[error("timeout waiting for data on socket (timeout was {0:?})")]
    Timeout(Duration),

    /// The connection went away while an exchange was outstanding.
    #[error("connection aborted: {0}")]
    ConnectionAborted(String),

    #[error("invalid endpoint url: {0}")]
    InvalidEndpointUrl(String),

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// The status code reported on the wire (in an `ERR` chunk) for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            TransportError::MalformedHeader(_) => StatusCode::BadTcpMessageTypeInvalid,
            TransportError::MalformedMessage(_) => StatusCode::BadTcpInternalError,
            TransportError::ChunkTooLarge { .. } => StatusCode::BadTcpMessageTooLarge,
            TransportError::ProtocolSequence { status, .. } => *status,
            TransportError::Validation { status, .. } => *status,
            TransportError::Rejected { status, .. } => *status,
            TransportError::Timeout(_) => StatusCode::BadTimeout,
            TransportError::ConnectionAborted(_) => StatusCode::BadConnectionClosed,
            TransportError::InvalidEndpointUrl(_) => StatusCode::BadTcpEndpointUrlInvalid,
            TransportError::Io(_) => StatusCode::BadCommunicationError,
        }
    }
}
