//! ADB message framing.
//!
//! Every message on the wire is a 24-byte little-endian header followed by
//! an optional payload:
//! - command, arg0, arg1
//! - payload length and payload checksum (byte sum mod 2^32)
//! - magic (`!command`)
//!
//! Decoding distinguishes "need more bytes" from corrupt data, and the
//! [`MessageReader`] turns partial transport reads into whole messages.

pub mod codec;
pub mod command;
pub mod error;
pub mod identity;
pub mod reader;
pub mod writer;

pub use codec::{
    checksum, decode_message, encode_message, CodecConfig, Message, CONNECT_AUTH_MAX_PAYLOAD,
    HEADER_SIZE, MAX_PAYLOAD, VERSION,
};
pub use command::{AuthType, Command};
pub use error::{CodecError, Result};
pub use identity::{SystemIdentity, SystemType};
pub use reader::MessageReader;
pub use writer::MessageWriter;
