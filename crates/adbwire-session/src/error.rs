use std::time::Duration;

use adbwire_message::CodecError;
use adbwire_sync::SyncError;
use adbwire_transport::TransportError;

/// Errors surfaced by connections, streams, and the sync client.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Bad magic, checksum, command, identity, or sync frame.
    #[error("malformed data: {0}")]
    Malformed(String),

    /// A payload or path exceeds the negotiated or protocol limit.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// A message that is not valid in the current connection or stream state.
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),

    /// The peer did not answer the handshake in time.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Every key was refused and no approval path remained.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The peer answered `OPEN` with `CLSE`.
    #[error("stream to '{0}' rejected by peer")]
    StreamRejected(String),

    /// The daemon answered a sync request with `FAIL`.
    #[error("sync failed: {0}")]
    SyncFailed(String),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local I/O error (thread spawn, push source, pull sink).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection is gone.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The stream was closed locally or by the peer.
    #[error("stream closed")]
    StreamClosed,

    /// An operation with its own deadline ran out of time.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Configuration values that cannot work.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<CodecError> for ProtocolError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Malformed(detail) => ProtocolError::Malformed(detail),
            CodecError::PayloadTooLarge { size, max } => {
                ProtocolError::PayloadTooLarge { size, max }
            }
            CodecError::Transport(err) => ProtocolError::Transport(err),
            CodecError::ConnectionClosed => {
                ProtocolError::Disconnected("connection closed by peer".to_string())
            }
        }
    }
}

impl From<SyncError> for ProtocolError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Malformed(detail) => ProtocolError::Malformed(detail),
            SyncError::PayloadTooLarge { size, max } => ProtocolError::PayloadTooLarge { size, max },
            SyncError::PathTooLong { len, max } => ProtocolError::PayloadTooLarge { size: len, max },
        }
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
