use adbwire_transport::Transport;
use bytes::BytesMut;
use tracing::trace;

use crate::codec::{encode_message, CodecConfig, Message};
use crate::error::{CodecError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete messages to a [`Transport`].
///
/// Header and payload are encoded into one buffer and handed to the
/// transport in a single `send`, so a message is never interleaved with
/// another writer's bytes as long as writers are serialized.
pub struct MessageWriter<T> {
    inner: T,
    buf: BytesMut,
    config: CodecConfig,
}

impl<T: Transport> MessageWriter<T> {
    /// Create a new message writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, CodecConfig::default())
    }

    /// Create a new message writer with explicit configuration.
    pub fn with_config(inner: T, config: CodecConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and send one message (blocking).
    pub fn write_message(&mut self, message: &Message) -> Result<()> {
        if message.payload.len() > self.config.max_payload_size {
            return Err(CodecError::PayloadTooLarge {
                size: message.payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.buf.clear();
        encode_message(message, &mut self.buf)?;
        trace!(
            command = %message.command,
            arg0 = message.arg0,
            arg1 = message.arg1,
            len = message.payload.len(),
            "sending message"
        );
        self.inner.send(&self.buf)?;
        Ok(())
    }

    /// Close the underlying transport.
    pub fn close(&mut self) -> Result<()> {
        self.inner.close().map_err(Into::into)
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the writer and return the inner transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update maximum payload size for subsequent encoding.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }

    /// Current writer configuration.
    pub fn config(&self) -> &CodecConfig {
        &self.config
    }
}
