use std::io::ErrorKind;

/// Errors that can occur in transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to connect to the specified address.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    /// An I/O error occurred on the underlying channel.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer stopped accepting bytes mid-send.
    #[error("transport closed by peer")]
    Closed,
}

impl TransportError {
    /// True when the error is an expired receive timeout rather than a failure.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            TransportError::Io(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut
        )
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
