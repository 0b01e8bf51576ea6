use std::borrow::Cow;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::command::{AuthType, Command};
use crate::error::{CodecError, Result};
use crate::identity::SystemIdentity;

/// Header: command, arg0, arg1, length, checksum, magic; six u32 LE = 24 bytes.
pub const HEADER_SIZE: usize = 24;

/// Protocol version advertised in `CNXN`.
pub const VERSION: u32 = 0x0100_0000;

/// Default maximum payload proposed during the handshake: 256 KiB.
pub const MAX_PAYLOAD: u32 = 256 * 1024;

/// Payload ceiling older daemons apply to `CNXN` and `AUTH`.
pub const CONNECT_AUTH_MAX_PAYLOAD: usize = 4096;

/// One ADB protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub command: Command,
    pub arg0: u32,
    pub arg1: u32,
    pub payload: Bytes,
}

impl Message {
    /// Create a message from its parts.
    pub fn new(command: Command, arg0: u32, arg1: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            command,
            arg0,
            arg1,
            payload: payload.into(),
        }
    }

    /// `CNXN(version, max_payload, "systemtype:serial:banner\0")`.
    pub fn connect(version: u32, max_payload: u32, identity: &SystemIdentity) -> Self {
        Self::new(Command::Cnxn, version, max_payload, identity.to_payload())
    }

    /// `AUTH(auth_type, 0, data)`.
    pub fn auth(auth_type: AuthType, data: impl Into<Bytes>) -> Self {
        Self::new(Command::Auth, auth_type.as_u32(), 0, data)
    }

    /// `AUTH(SIGNATURE)` carrying a signed token.
    pub fn auth_signature(signature: impl Into<Bytes>) -> Self {
        Self::auth(AuthType::Signature, signature)
    }

    /// `AUTH(RSAPUBLICKEY)` carrying a NUL-terminated public key.
    pub fn auth_public_key(public_key: &[u8]) -> Self {
        Self::auth(AuthType::RsaPublicKey, null_terminated(public_key))
    }

    /// `OPEN(local_id, 0, "destination\0")`.
    pub fn open(local_id: u32, destination: &str) -> Self {
        Self::new(
            Command::Open,
            local_id,
            0,
            null_terminated(destination.as_bytes()),
        )
    }

    /// `OKAY(local_id, remote_id)`: stream ready, or write acknowledged.
    pub fn okay(local_id: u32, remote_id: u32) -> Self {
        Self::new(Command::Okay, local_id, remote_id, Bytes::new())
    }

    /// `WRTE(local_id, remote_id, data)`.
    pub fn write(local_id: u32, remote_id: u32, data: impl Into<Bytes>) -> Self {
        Self::new(Command::Wrte, local_id, remote_id, data)
    }

    /// `CLSE(local_id, remote_id)`.
    pub fn close(local_id: u32, remote_id: u32) -> Self {
        Self::new(Command::Clse, local_id, remote_id, Bytes::new())
    }

    /// Checksum of the payload as it appears in the header.
    pub fn checksum(&self) -> u32 {
        checksum(&self.payload)
    }

    /// Magic value as it appears in the header.
    pub fn magic(&self) -> u32 {
        self.command.magic()
    }

    /// The total wire size of this message (header + payload).
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// The payload as text, without trailing NUL terminators.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(trim_nul(&self.payload))
    }
}

/// Sum of payload bytes modulo 2^32.
pub fn checksum(payload: &[u8]) -> u32 {
    payload
        .iter()
        .fold(0u32, |acc, &byte| acc.wrapping_add(u32::from(byte)))
}

/// Encode a message into the wire format.
///
/// Wire format (all fields u32 little-endian):
/// ```text
/// ┌─────────┬──────┬──────┬────────┬──────────┬───────────┬───────────┐
/// │ command │ arg0 │ arg1 │ length │ checksum │ magic     │ payload   │
/// │         │      │      │        │ Σ bytes  │ !command  │ (length)  │
/// └─────────┴──────┴──────┴────────┴──────────┴───────────┴───────────┘
/// ```
pub fn encode_message(message: &Message, dst: &mut BytesMut) -> Result<()> {
    let len = message.payload.len();
    if len > u32::MAX as usize {
        return Err(CodecError::PayloadTooLarge {
            size: len,
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + len);
    dst.put_u32_le(message.command.as_u32());
    dst.put_u32_le(message.arg0);
    dst.put_u32_le(message.arg1);
    dst.put_u32_le(len as u32);
    dst.put_u32_le(message.checksum());
    dst.put_u32_le(message.magic());
    dst.put_slice(&message.payload);
    Ok(())
}

/// Decode one message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't hold a complete message yet; the
/// buffer is left untouched. On success exactly one message's bytes are
/// consumed. Any validation failure is an error and leaves the framing state
/// unrecoverable.
pub fn decode_message(src: &mut BytesMut, max_payload: usize) -> Result<Option<Message>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let raw_command = read_u32(src, 0);
    let arg0 = read_u32(src, 4);
    let arg1 = read_u32(src, 8);
    let payload_len = read_u32(src, 12) as usize;
    let expected_checksum = read_u32(src, 16);
    let magic = read_u32(src, 20);

    if magic != !raw_command {
        return Err(CodecError::Malformed(format!(
            "magic 0x{magic:08x} does not match command 0x{raw_command:08x}"
        )));
    }
    let command = Command::try_from(raw_command)?;

    if payload_len > max_payload {
        return Err(CodecError::PayloadTooLarge {
            size: payload_len,
            max: max_payload,
        });
    }

    let total = HEADER_SIZE + payload_len;
    if src.len() < total {
        return Ok(None);
    }

    let actual_checksum = checksum(&src[HEADER_SIZE..total]);
    if actual_checksum != expected_checksum {
        return Err(CodecError::Malformed(format!(
            "{command} checksum mismatch: header {expected_checksum}, payload {actual_checksum}"
        )));
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(payload_len).freeze();

    Ok(Some(Message {
        command,
        arg0,
        arg1,
        payload,
    }))
}

/// Configuration for message readers and writers.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Maximum payload size in bytes. Default: [`MAX_PAYLOAD`].
    pub max_payload_size: usize,
    /// Receive timeout applied to the transport by the reader.
    pub read_timeout: Option<std::time::Duration>,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD as usize,
            read_timeout: None,
        }
    }
}

fn read_u32(src: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        src[offset],
        src[offset + 1],
        src[offset + 2],
        src[offset + 3],
    ])
}

fn null_terminated(data: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len() + 1);
    out.put_slice(data);
    out.put_u8(0);
    out.freeze()
}

pub(crate) fn trim_nul(data: &[u8]) -> &[u8] {
    let end = data
        .iter()
        .rposition(|&byte| byte != 0)
        .map_or(0, |pos| pos + 1);
    &data[..end]
}
