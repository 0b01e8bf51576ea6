use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::{Result, TransportError};
use crate::traits::{ignore_not_connected, receive_some, send_all, Transport};

/// Conventional `adbd` TCP port (`adb tcpip 5555`).
pub const DEFAULT_PORT: u16 = 5555;

/// TCP transport to a device running `adbd` in network mode.
pub struct TcpTransport {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl TcpTransport {
    /// Connect to `addr` (blocking).
    pub fn connect(addr: impl ToSocketAddrs + std::fmt::Debug) -> Result<Self> {
        let label = format!("{addr:?}");
        let stream = TcpStream::connect(addr).map_err(|source| TransportError::Connect {
            addr: label,
            source,
        })?;
        Self::from_stream(stream)
    }

    /// Connect to `addr`, giving up after `timeout`.
    pub fn connect_timeout(addr: &SocketAddr, timeout: Duration) -> Result<Self> {
        let stream =
            TcpStream::connect_timeout(addr, timeout).map_err(|source| TransportError::Connect {
                addr: addr.to_string(),
                source,
            })?;
        Self::from_stream(stream)
    }

    /// Wrap an already-connected stream.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        // Small control messages (OKAY, CLSE) must not sit in Nagle's buffer.
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr().ok();
        debug!(?peer, "tcp transport connected");
        Ok(Self { stream, peer })
    }

    /// Remote address, if known.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        send_all(&mut self.stream, data)
    }

    fn receive(&mut self, max_bytes: usize) -> Result<Bytes> {
        receive_some(&mut self.stream, max_bytes)
    }

    fn close(&mut self) -> Result<()> {
        debug!(peer = ?self.peer, "closing tcp transport");
        ignore_not_connected(self.stream.shutdown(Shutdown::Both))
    }

    fn set_receive_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.stream.set_read_timeout(timeout).map_err(Into::into)
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            stream: self.stream.try_clone()?,
            peer: self.peer,
        })
    }

    fn transport_name(&self) -> &'static str {
        "tcp"
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("peer", &self.peer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread;

    use super::*;

    #[test]
    fn send_receive_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut transport = TcpTransport::from_stream(stream).unwrap();
            let data = transport.receive(64).unwrap();
            transport.send(&data).unwrap();
        });

        let mut client = TcpTransport::connect(addr).unwrap();
        assert_eq!(client.peer_addr(), Some(addr));
        client.send(b"OKAY").unwrap();

        let mut echoed = Vec::new();
        while echoed.len() < 4 {
            let chunk = client.receive(64).unwrap();
            assert!(!chunk.is_empty());
            echoed.extend_from_slice(&chunk);
        }
        assert_eq!(echoed, b"OKAY");
        server.join().unwrap();
    }

    #[test]
    fn close_on_clone_unblocks_receiver() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = thread::spawn(move || listener.accept().unwrap());

        let mut client = TcpTransport::connect_timeout(&addr, Duration::from_secs(5)).unwrap();
        let mut reader = client.try_clone().unwrap();
        let pending = thread::spawn(move || reader.receive(16));

        thread::sleep(Duration::from_millis(50));
        client.close().unwrap();

        let received = pending.join().unwrap();
        assert!(matches!(received, Ok(ref bytes) if bytes.is_empty()) || received.is_err());
    }

    #[test]
    fn connect_refused_reports_address() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpTransport::connect(addr).unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
