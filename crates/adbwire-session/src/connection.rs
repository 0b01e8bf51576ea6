use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use adbwire_message::{
    CodecConfig, CodecError, Command, Message, MessageReader, MessageWriter, SystemIdentity,
};
use adbwire_transport::Transport;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::auth::AuthSigner;
use crate::config::ConnectionConfig;
use crate::destination::Destination;
use crate::error::{ProtocolError, Result};
use crate::handshake::{handshake_client, ConnectionInfo};
use crate::stream::{LogicalStream, RemoteClose, StreamInner, StreamState};
use crate::sync::SyncClient;
use crate::table::RoutingTable;

/// Object-safe view of the write half so the connection is not generic
/// over the transport.
trait WireSink: Send {
    fn write_message(&mut self, message: &Message) -> std::result::Result<(), CodecError>;
    fn shutdown(&mut self);
}

impl<T: Transport> WireSink for MessageWriter<T> {
    fn write_message(&mut self, message: &Message) -> std::result::Result<(), CodecError> {
        MessageWriter::write_message(self, message)
    }

    fn shutdown(&mut self) {
        if let Err(err) = self.close() {
            debug!(error = %err, "transport close failed");
        }
    }
}

/// State shared by the connection handle, its streams, and the dispatch thread.
pub(crate) struct Link {
    writer: Mutex<Box<dyn WireSink>>,
    table: Mutex<RoutingTable>,
    closed: AtomicBool,
    fatal: Mutex<Option<ProtocolError>>,
    config: ConnectionConfig,
    info: ConnectionInfo,
}

impl Link {
    pub(crate) fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub(crate) fn max_payload(&self) -> usize {
        self.info.max_payload
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Encode and write one message under the writer lock.
    ///
    /// A write failure tears the connection down.
    pub(crate) fn send(&self, message: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::Disconnected("connection closed".to_string()));
        }
        let written = self.writer.lock().write_message(message);
        match written {
            Ok(()) => Ok(()),
            Err(err) => {
                let reason = err.to_string();
                self.teardown(Some(err.into()));
                Err(ProtocolError::Disconnected(reason))
            }
        }
    }

    pub(crate) fn retire(&self, local_id: u32) {
        self.table.lock().retire(local_id, Instant::now());
    }

    /// Close the link once: fail every stream, then close the transport,
    /// which unblocks the dispatch thread.
    fn teardown(&self, cause: Option<ProtocolError>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let reason = match &cause {
            Some(err) => err.to_string(),
            None => "connection closed".to_string(),
        };
        if let Some(err) = cause {
            warn!(error = %err, "connection failed");
            *self.fatal.lock() = Some(err);
        } else {
            debug!("closing connection");
        }

        let streams = self.table.lock().drain();
        for stream in streams {
            stream.disconnect(&reason);
        }
        self.writer.lock().shutdown();
    }
}

/// A multiplexed connection to `adbd`.
///
/// Owns the transport. A dedicated `adb-dispatch` thread reads and routes
/// every inbound message; streams and the connection itself only write.
pub struct Connection {
    link: Arc<Link>,
    incoming: Mutex<Receiver<LogicalStream>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Connect with default settings, announcing `identity`, without auth keys.
pub fn connect<T: Transport>(transport: T, identity: SystemIdentity) -> Result<Connection> {
    let config = ConnectionConfig {
        identity,
        ..ConnectionConfig::default()
    };
    connect_with_config(transport, config, &[])
}

/// Perform the handshake over `transport` and start the dispatch thread.
///
/// `signers` are tried in order when the device asks for authentication.
/// On failure the transport is closed.
pub fn connect_with_config<T: Transport>(
    transport: T,
    config: ConnectionConfig,
    signers: &[Arc<dyn AuthSigner>],
) -> Result<Connection> {
    config.validate()?;

    let reader_half = transport.try_clone()?;
    let codec = CodecConfig {
        max_payload_size: config.max_handshake_payload,
        read_timeout: Some(config.poll_interval),
    };
    let mut reader = MessageReader::with_config(reader_half, codec.clone())?;
    let mut writer = MessageWriter::with_config(transport, codec);

    let info = match handshake_client(&mut reader, &mut writer, &config, signers) {
        Ok(info) => info,
        Err(err) => {
            if let Err(close_err) = writer.close() {
                debug!(error = %close_err, "transport close after failed handshake");
            }
            return Err(err);
        }
    };

    // Both directions are bounded by the negotiated minimum.
    reader.set_max_payload_size(info.max_payload);
    writer.set_max_payload_size(info.max_payload);

    info!(
        transport = reader.get_ref().transport_name(),
        peer = %info.peer,
        version = info.version,
        max_payload = info.max_payload,
        "connection established"
    );

    Connection::start(reader, Box::new(writer), config, info)
}

impl Connection {
    fn start<R: Transport>(
        reader: MessageReader<R>,
        writer: Box<dyn WireSink>,
        config: ConnectionConfig,
        info: ConnectionInfo,
    ) -> Result<Self> {
        let link = Arc::new(Link {
            writer: Mutex::new(writer),
            table: Mutex::new(RoutingTable::new(config.close_timeout)),
            closed: AtomicBool::new(false),
            fatal: Mutex::new(None),
            config,
            info,
        });

        let (accepted_tx, accepted_rx) = mpsc::channel();
        let accepted = link.config.accept_remote_open.then_some(accepted_tx);
        let dispatcher = Dispatcher {
            reader,
            link: Arc::clone(&link),
            accepted,
            last_sweep: Instant::now(),
        };

        let handle = thread::Builder::new()
            .name("adb-dispatch".to_string())
            .spawn(move || dispatcher.run());
        let handle = match handle {
            Ok(handle) => handle,
            Err(err) => {
                link.teardown(None);
                return Err(err.into());
            }
        };

        Ok(Self {
            link,
            incoming: Mutex::new(accepted_rx),
            dispatcher: Mutex::new(Some(handle)),
        })
    }

    /// Open a stream to a service and wait for the device to accept it.
    pub fn open(&self, destination: impl Into<Destination>) -> Result<LogicalStream> {
        let destination = destination.into().to_string();
        let link = &self.link;
        if link.is_closed() {
            return Err(ProtocolError::Disconnected("connection closed".to_string()));
        }
        if destination.len() + 1 > link.max_payload() {
            return Err(ProtocolError::PayloadTooLarge {
                size: destination.len() + 1,
                max: link.max_payload(),
            });
        }

        let inner = {
            let mut table = link.table.lock();
            let local_id = table.allocate(Instant::now()).ok_or_else(|| {
                ProtocolError::InvalidConfig("no free stream ids".to_string())
            })?;
            let inner = Arc::new(StreamInner::opening(local_id, destination.clone()));
            table.insert(local_id, Arc::clone(&inner));
            inner
        };
        let local_id = inner.local_id();

        if let Err(err) = link.send(&Message::open(local_id, &destination)) {
            link.retire(local_id);
            return Err(err);
        }
        debug!(local_id, destination = %destination, "opening stream");

        let timeout = link.config.open_timeout;
        match inner.wait_open(Instant::now() + timeout)? {
            Some(StreamState::Closed) => {
                link.retire(local_id);
                Err(ProtocolError::StreamRejected(destination))
            }
            Some(_) => Ok(LogicalStream::new(Arc::clone(link), inner)),
            None => {
                if inner.abandon_open() {
                    link.retire(local_id);
                    debug!(local_id, destination = %destination, "open timed out");
                    return Err(ProtocolError::Timeout(timeout));
                }
                // Resolved between the timeout and the check.
                match inner.state() {
                    StreamState::Closed => {
                        link.retire(local_id);
                        Err(ProtocolError::StreamRejected(destination))
                    }
                    _ => Ok(LogicalStream::new(Arc::clone(link), inner)),
                }
            }
        }
    }

    /// Open `sync:` and wrap it in a file-transfer client.
    pub fn sync(&self) -> Result<SyncClient> {
        self.open(Destination::Sync).map(SyncClient::new)
    }

    /// Wait for a stream opened by the device.
    ///
    /// Requires `accept_remote_open`; without it the device's `OPEN`s are refused.
    pub fn accept(&self) -> Result<LogicalStream> {
        self.ensure_accepting()?;
        self.incoming
            .lock()
            .recv()
            .map_err(|_| ProtocolError::Disconnected("connection closed".to_string()))
    }

    /// [`accept`](Self::accept) with a deadline.
    pub fn accept_timeout(&self, timeout: Duration) -> Result<LogicalStream> {
        self.ensure_accepting()?;
        match self.incoming.lock().recv_timeout(timeout) {
            Ok(stream) => Ok(stream),
            Err(RecvTimeoutError::Timeout) => Err(ProtocolError::Timeout(timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ProtocolError::Disconnected("connection closed".to_string()))
            }
        }
    }

    fn ensure_accepting(&self) -> Result<()> {
        if !self.link.config.accept_remote_open {
            return Err(ProtocolError::InvalidConfig(
                "accept_remote_open is disabled".to_string(),
            ));
        }
        Ok(())
    }

    /// Negotiated version, payload limit, and device identity.
    pub fn info(&self) -> &ConnectionInfo {
        &self.link.info
    }

    pub fn peer(&self) -> &SystemIdentity {
        &self.link.info.peer
    }

    pub fn max_payload(&self) -> usize {
        self.link.max_payload()
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.link.config
    }

    /// Streams still in the routing table, including ones waiting for the
    /// peer's `CLSE`.
    pub fn open_streams(&self) -> usize {
        self.link.table.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    /// Shut down: wake every stream with `Disconnected`, close the transport,
    /// and join the dispatch thread.
    ///
    /// Returns the error that killed the connection, if one did.
    pub fn close(&self) -> Result<()> {
        self.link.teardown(None);
        if let Some(handle) = self.dispatcher.lock().take() {
            if handle.join().is_err() {
                warn!("dispatch thread panicked");
            }
        }
        match self.link.fatal.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(error = %err, "connection ended with error");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.link.info.peer)
            .field("max_payload", &self.link.info.max_payload)
            .field("open_streams", &self.open_streams())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Inbound half: owns the reader and routes messages to streams.
struct Dispatcher<R> {
    reader: MessageReader<R>,
    link: Arc<Link>,
    accepted: Option<Sender<LogicalStream>>,
    last_sweep: Instant,
}

impl<R: Transport> Dispatcher<R> {
    fn run(mut self) {
        loop {
            if self.link.is_closed() {
                break;
            }
            match self.reader.read_message() {
                Ok(message) => {
                    if let Err(err) = self.dispatch(message) {
                        self.link.teardown(Some(err));
                        break;
                    }
                }
                Err(err) if err.is_timeout() => {}
                Err(err) => {
                    if !self.link.is_closed() {
                        self.link.teardown(Some(err.into()));
                    }
                    break;
                }
            }
            self.sweep();
        }
        trace!("dispatch loop exited");
    }

    fn dispatch(&mut self, message: Message) -> Result<()> {
        trace!(
            command = %message.command,
            arg0 = message.arg0,
            arg1 = message.arg1,
            len = message.payload.len(),
            "received message"
        );
        match message.command {
            Command::Okay => {
                match self.stream(message.arg1) {
                    Some(stream) => stream.on_okay(message.arg0),
                    None => trace!(local_id = message.arg1, "discarding OKAY for unknown stream"),
                }
                Ok(())
            }
            Command::Wrte => {
                match self.stream(message.arg1) {
                    Some(stream) => {
                        stream.on_write(message.payload);
                    }
                    None => trace!(local_id = message.arg1, "discarding WRTE for unknown stream"),
                }
                Ok(())
            }
            Command::Clse => {
                self.on_remote_close(message.arg1);
                Ok(())
            }
            Command::Open => self.on_remote_open(message),
            Command::Cnxn | Command::Auth => Err(ProtocolError::UnexpectedMessage(format!(
                "{} after handshake",
                message.command
            ))),
            Command::Sync => {
                trace!("ignoring SYNC");
                Ok(())
            }
        }
    }

    fn stream(&self, local_id: u32) -> Option<Arc<StreamInner>> {
        self.link.table.lock().get(local_id)
    }

    fn on_remote_close(&self, local_id: u32) {
        let Some(stream) = self.stream(local_id) else {
            trace!(local_id, "discarding CLSE for unknown stream");
            return;
        };
        match stream.on_close() {
            RemoteClose::Rejected => {
                debug!(local_id, "open rejected by peer");
                self.link.retire(local_id);
            }
            RemoteClose::Destroyed => {
                debug!(local_id, "stream closed");
                self.link.retire(local_id);
            }
            RemoteClose::HalfClosed => debug!(local_id, "peer closed stream"),
            RemoteClose::Duplicate => trace!(local_id, "discarding duplicate CLSE"),
        }
    }

    fn on_remote_open(&self, message: Message) -> Result<()> {
        let remote_id = message.arg0;
        let destination = message.payload_str().into_owned();

        let Some(accepted) = &self.accepted else {
            debug!(remote_id, destination = %destination, "refusing stream opened by peer");
            return self.link.send(&Message::close(0, remote_id));
        };

        let inner = {
            let mut table = self.link.table.lock();
            let Some(local_id) = table.allocate(Instant::now()) else {
                drop(table);
                return self.link.send(&Message::close(0, remote_id));
            };
            let inner = Arc::new(StreamInner::accepted(local_id, remote_id, destination.clone()));
            table.insert(local_id, Arc::clone(&inner));
            inner
        };

        self.link
            .send(&Message::okay(inner.local_id(), remote_id))?;
        debug!(local_id = inner.local_id(), remote_id, destination = %destination, "accepted stream opened by peer");

        let stream = LogicalStream::new(Arc::clone(&self.link), inner);
        if accepted.send(stream).is_err() {
            trace!("connection handle gone; accepted stream dropped");
        }
        Ok(())
    }

    fn sweep(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_sweep) < self.link.config.poll_interval {
            return;
        }
        self.last_sweep = now;

        let close_timeout = self.link.config.close_timeout;
        let streams = self.link.table.lock().streams();
        for stream in streams {
            if stream.expire_close(now, close_timeout) {
                self.link.retire(stream.local_id());
            }
        }
        self.link.table.lock().purge_retired(now);
    }
}
