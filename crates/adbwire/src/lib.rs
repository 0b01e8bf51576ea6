//! Client-side engine for the Android Debug Bridge wire protocol.
//!
//! adbwire talks directly to `adbd` over any byte transport: it frames
//! messages, runs the connect/auth handshake, multiplexes logical streams
//! with per-stream flow control, and speaks the file-sync sub-protocol.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte transport abstraction (TCP, Unix sockets)
//! - [`message`]: 24-byte message headers, checksums, buffered reader/writer
//! - [`sync`]: file-sync frame codec
//! - [`session`]: handshake, multiplexed connection, streams, sync client
//!   (behind the `session` feature)
//!
//! ```no_run
//! # #[cfg(feature = "session")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use adbwire::session::{connect, Destination};
//! use adbwire::message::SystemIdentity;
//! use adbwire::transport::TcpTransport;
//!
//! let transport = TcpTransport::connect("127.0.0.1:5555")?;
//! let conn = connect(transport, SystemIdentity::host("", ""))?;
//! let shell = conn.open(Destination::shell("getprop ro.product.model"))?;
//! let output = shell.read_to_end()?;
//! println!("{}", String::from_utf8_lossy(&output));
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "session"))]
//! # fn main() {}
//! ```

/// Re-export transport types.
pub mod transport {
    pub use adbwire_transport::*;
}

/// Re-export message types.
pub mod message {
    pub use adbwire_message::*;
}

/// Re-export sync codec types.
pub mod sync {
    pub use adbwire_sync::*;
}

/// Re-export session types (requires `session` feature).
#[cfg(feature = "session")]
pub mod session {
    pub use adbwire_session::*;
}
