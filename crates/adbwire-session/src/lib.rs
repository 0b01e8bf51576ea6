//! Client side of the ADB protocol on top of a message transport.
//!
//! - [`handshake`]: the `CNXN`/`AUTH` exchange, as a pure state machine plus
//!   a blocking driver
//! - [`Connection`]: stream multiplexing over one transport, with a dispatch
//!   thread routing inbound messages by local id
//! - [`LogicalStream`]: one service conversation with per-write flow control
//! - [`SyncClient`]: file transfer over a `sync:` stream
//! - `RsaSigner`: `adbkey` signing for `AUTH` (behind the default `rsa-auth` feature)

pub mod auth;
pub mod config;
pub mod connection;
pub mod destination;
pub mod error;
pub mod handshake;
pub mod stream;
pub mod sync;

#[cfg(feature = "rsa-auth")]
pub mod rsa_signer;

mod table;

#[cfg(all(test, unix))]
mod testing;

pub use auth::{AuthSigner, SignError};
pub use config::ConnectionConfig;
pub use connection::{connect, connect_with_config, Connection};
pub use destination::Destination;
pub use error::{ProtocolError, Result};
pub use handshake::{
    handshake_client, ClientHandshake, ConnectionInfo, HandshakeState, HandshakeStep,
};
#[cfg(feature = "rsa-auth")]
pub use rsa_signer::{KeyLoadError, RsaSigner, AUTH_TOKEN_SIZE};
pub use stream::{LogicalStream, Side, StreamState};
pub use sync::SyncClient;
