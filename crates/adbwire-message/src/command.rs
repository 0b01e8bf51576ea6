//! Command and auth-type identifiers.
//!
//! Commands travel as the little-endian encoding of their four ASCII
//! characters, so `CNXN` is `0x4e584e43` on the wire.

use std::fmt;

use crate::error::CodecError;

/// ADB protocol commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Command {
    /// Legacy internal marker; ignored after the handshake.
    Sync = 0x434e_5953,
    /// Connection request/response.
    Cnxn = 0x4e58_4e43,
    /// Authentication exchange.
    Auth = 0x4854_5541,
    /// Open a stream to a destination.
    Open = 0x4e45_504f,
    /// Stream ready / write acknowledged.
    Okay = 0x5941_4b4f,
    /// Stream close.
    Clse = 0x4553_4c43,
    /// Stream data.
    Wrte = 0x4554_5257,
}

impl Command {
    /// Every command, in wire order of appearance during a session.
    pub const ALL: [Command; 7] = [
        Command::Cnxn,
        Command::Auth,
        Command::Open,
        Command::Okay,
        Command::Wrte,
        Command::Clse,
        Command::Sync,
    ];

    /// The raw header value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// The header's magic field: the bitwise complement of the command.
    pub fn magic(self) -> u32 {
        !self.as_u32()
    }

    /// Look up a command by its raw header value.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|command| command.as_u32() == value)
    }

    /// The four-character tag, e.g. `"CNXN"`.
    pub fn name(self) -> &'static str {
        match self {
            Command::Sync => "SYNC",
            Command::Cnxn => "CNXN",
            Command::Auth => "AUTH",
            Command::Open => "OPEN",
            Command::Okay => "OKAY",
            Command::Clse => "CLSE",
            Command::Wrte => "WRTE",
        }
    }
}

impl TryFrom<u32> for Command {
    type Error = CodecError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::from_u32(value)
            .ok_or_else(|| CodecError::Malformed(format!("unknown command 0x{value:08x}")))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `arg0` of an `AUTH` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum AuthType {
    /// Device-issued random token to be signed.
    Token = 1,
    /// Host signature over the last token.
    Signature = 2,
    /// Host public key offered for enrollment.
    RsaPublicKey = 3,
}

impl AuthType {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for AuthType {
    type Error = CodecError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AuthType::Token),
            2 => Ok(AuthType::Signature),
            3 => Ok(AuthType::RsaPublicKey),
            other => Err(CodecError::Malformed(format!("unknown auth type {other}"))),
        }
    }
}
