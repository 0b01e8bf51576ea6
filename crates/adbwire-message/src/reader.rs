use adbwire_transport::Transport;
use bytes::BytesMut;

use crate::codec::{decode_message, CodecConfig, Message, HEADER_SIZE};
use crate::error::{CodecError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Reads complete messages from a [`Transport`].
///
/// Handles partial reads internally; callers always get whole messages.
/// Bytes of a partially received message survive a receive timeout, so a
/// caller may poll with a short timeout without losing framing.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    config: CodecConfig,
}

impl<T: Transport> MessageReader<T> {
    /// Create a new message reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config: CodecConfig::default(),
        }
    }

    /// Create a reader and apply the read timeout from `config` to the transport.
    pub fn with_config(inner: T, config: CodecConfig) -> Result<Self> {
        inner.set_receive_timeout(config.read_timeout)?;
        Ok(Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        })
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(CodecError::ConnectionClosed)` when EOF is reached.
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = decode_message(&mut self.buf, self.config.max_payload_size)? {
                return Ok(message);
            }

            let wanted = self.missing_bytes().clamp(1, READ_CHUNK_SIZE);
            let chunk = self.inner.receive(wanted)?;
            if chunk.is_empty() {
                return Err(CodecError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk);
        }
    }

    /// Bytes still needed to finish the message at the head of the buffer.
    fn missing_bytes(&self) -> usize {
        if self.buf.len() < HEADER_SIZE {
            return READ_CHUNK_SIZE;
        }
        let declared = u32::from_le_bytes([self.buf[12], self.buf[13], self.buf[14], self.buf[15]]);
        (HEADER_SIZE + declared as usize).saturating_sub(self.buf.len())
    }

    /// Number of buffered bytes not yet returned as a message.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent decoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current reader configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}
