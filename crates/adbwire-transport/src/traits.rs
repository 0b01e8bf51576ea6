use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Result, TransportError};

/// A byte-oriented duplex channel to an `adbd` instance.
///
/// The protocol engine is agnostic to what sits underneath: a TCP socket,
/// USB bulk endpoints, or an in-process socket pair. Implementations must be
/// cloneable into an independent handle so one thread can block in
/// [`receive`](Transport::receive) while another sends; closing either handle
/// must unblock a pending `receive` on the other.
pub trait Transport: Send + 'static {
    /// Send every byte of `data`, blocking until written.
    fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Receive up to `max_bytes`. An empty buffer means end of stream.
    fn receive(&mut self, max_bytes: usize) -> Result<Bytes>;

    /// Shut down both directions.
    fn close(&mut self) -> Result<()>;

    /// Bound how long `receive` may block. `None` blocks indefinitely.
    ///
    /// An expired timeout surfaces as an error for which
    /// [`TransportError::is_timeout`] returns true.
    fn set_receive_timeout(&self, timeout: Option<Duration>) -> Result<()>;

    /// Create a second handle to the same channel.
    fn try_clone(&self) -> Result<Self>
    where
        Self: Sized;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}

/// Write all of `data`, retrying on interruption and spurious would-block.
pub(crate) fn send_all<W: Write>(inner: &mut W, data: &[u8]) -> Result<()> {
    let mut offset = 0usize;
    while offset < data.len() {
        match inner.write(&data[offset..]) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => offset += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
            Err(err) => return Err(TransportError::Io(err)),
        }
    }

    loop {
        match inner.flush() {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(TransportError::Io(err)),
        }
    }
}

/// Read once into a fresh buffer of at most `max_bytes`.
pub(crate) fn receive_some<R: Read>(inner: &mut R, max_bytes: usize) -> Result<Bytes> {
    let mut chunk = vec![0u8; max_bytes.max(1)];
    loop {
        match inner.read(&mut chunk) {
            Ok(n) => {
                chunk.truncate(n);
                return Ok(Bytes::from(chunk));
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(TransportError::Io(err)),
        }
    }
}

/// Shutdown errors on an already-disconnected socket are not failures.
pub(crate) fn ignore_not_connected(result: std::io::Result<()>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
        Err(err) => Err(TransportError::Io(err)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct InterruptedOnce {
        interrupted: bool,
        data: Vec<u8>,
    }

    impl Write for InterruptedOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            // Accept one byte at a time to exercise the offset loop.
            self.data.push(buf[0]);
            Ok(1)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn send_all_retries_and_completes() {
        let mut sink = InterruptedOnce {
            interrupted: false,
            data: Vec::new(),
        };
        send_all(&mut sink, b"CNXN").unwrap();
        assert_eq!(sink.data, b"CNXN");
    }

    #[test]
    fn send_all_reports_closed_on_zero_write() {
        let err = send_all(&mut ZeroWriter, b"x").unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn receive_some_respects_limit_and_eof() {
        let mut source = Cursor::new(b"abcdef".to_vec());
        assert_eq!(receive_some(&mut source, 4).unwrap().as_ref(), b"abcd");
        assert_eq!(receive_some(&mut source, 4).unwrap().as_ref(), b"ef");
        assert!(receive_some(&mut source, 4).unwrap().is_empty());
    }

    #[test]
    fn timeout_classification() {
        let timeout = TransportError::Io(std::io::Error::from(ErrorKind::WouldBlock));
        let timed_out = TransportError::Io(std::io::Error::from(ErrorKind::TimedOut));
        let reset = TransportError::Io(std::io::Error::from(ErrorKind::ConnectionReset));
        assert!(timeout.is_timeout());
        assert!(timed_out.is_timeout());
        assert!(!reset.is_timeout());
        assert!(!TransportError::Closed.is_timeout());
    }
}
