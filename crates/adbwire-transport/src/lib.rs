//! Byte transport abstraction for the ADB wire protocol.
//!
//! Provides a unified interface over the channels `adbd` can be reached on:
//! - TCP sockets (`adb tcpip` mode, emulators)
//! - Unix domain sockets (local bridges, in-process pairs)
//!
//! USB bulk endpoints plug in by implementing [`Transport`]. This is the
//! lowest layer of adbwire; everything else builds on it.

pub mod error;
pub mod tcp;
pub mod traits;

#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use tcp::{TcpTransport, DEFAULT_PORT};
pub use traits::Transport;

#[cfg(unix)]
pub use uds::UnixTransport;
