use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{ignore_not_connected, receive_some, send_all, Transport};

/// Unix domain socket transport.
///
/// Used for local bridges that expose `adbd` on a socket path (emulator
/// forwarding, USB-to-socket relays) and for in-process socket pairs.
pub struct UnixTransport {
    stream: UnixStream,
    path: Option<PathBuf>,
}

impl UnixTransport {
    /// Connect to a listening socket path (blocking).
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).map_err(|source| TransportError::Connect {
            addr: path.display().to_string(),
            source,
        })?;
        debug!(?path, "connected to unix domain socket");
        Ok(Self {
            stream,
            path: Some(path.to_path_buf()),
        })
    }

    /// Create a connected pair of transports.
    pub fn pair() -> Result<(Self, Self)> {
        let (left, right) = UnixStream::pair()?;
        Ok((Self::from_stream(left), Self::from_stream(right)))
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream, path: None }
    }

    /// The socket path this transport connected to, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Transport for UnixTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        send_all(&mut self.stream, data)
    }

    fn receive(&mut self, max_bytes: usize) -> Result<Bytes> {
        receive_some(&mut self.stream, max_bytes)
    }

    fn close(&mut self) -> Result<()> {
        ignore_not_connected(self.stream.shutdown(Shutdown::Both))
    }

    fn set_receive_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout).map_err(Into::into)
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            stream: self.stream.try_clone()?,
            path: self.path.clone(),
        })
    }

    fn transport_name(&self) -> &'static str {
        "unix-domain-socket"
    }
}

impl std::fmt::Debug for UnixTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnixTransport")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixListener;
    use std::thread;

    use super::*;

    #[test]
    fn pair_roundtrip() {
        let (mut left, mut right) = UnixTransport::pair().unwrap();
        left.send(b"hello").unwrap();
        let got = right.receive(16).unwrap();
        assert_eq!(got.as_ref(), b"hello");
        assert!(left.path().is_none());
    }

    #[test]
    fn receive_timeout_is_reported() {
        let (_left, mut right) = UnixTransport::pair().unwrap();
        right
            .set_receive_timeout(Some(Duration::from_millis(20)))
            .unwrap();
        let err = right.receive(16).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn close_signals_eof_to_peer() {
        let (mut left, mut right) = UnixTransport::pair().unwrap();
        left.close().unwrap();
        assert!(right.receive(16).unwrap().is_empty());
        // Closing twice is harmless.
        left.close().unwrap();
    }

    #[test]
    fn connect_to_socket_path() {
        let dir = std::env::temp_dir().join(format!("adbwire-uds-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sock_path = dir.join("adbd.sock");
        let _ = std::fs::remove_file(&sock_path);
        let listener = UnixListener::bind(&sock_path).unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut transport = UnixTransport::from_stream(stream);
            transport.send(b"CNXN").unwrap();
        });

        let mut client = UnixTransport::connect(&sock_path).unwrap();
        assert_eq!(client.path(), Some(sock_path.as_path()));
        assert_eq!(client.receive(4).unwrap().as_ref(), b"CNXN");

        server.join().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
