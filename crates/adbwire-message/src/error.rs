use adbwire_transport::TransportError;

/// Errors that can occur during message encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Header or payload failed validation (magic, checksum, command, identity).
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The connection was closed before a complete message was received.
    #[error("connection closed (incomplete message)")]
    ConnectionClosed,
}

impl CodecError {
    /// True when a read gave up because the receive timeout expired.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CodecError::Transport(err) if err.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, CodecError>;
