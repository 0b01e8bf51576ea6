/// Errors that can occur while encoding or decoding sync frames.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Frame id unknown for the current phase, or a truncated fixed-size field.
    #[error("malformed sync frame: {0}")]
    Malformed(String),

    /// A length field exceeds what the session allows.
    #[error("sync payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Remote path longer than the daemon accepts.
    #[error("sync path too long ({len} bytes, max {max})")]
    PathTooLong { len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, SyncError>;
