use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use adbwire_message::Message;
use bytes::Bytes;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::connection::Link;
use crate::error::{ProtocolError, Result};

/// Which end of a stream closed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

/// Lifecycle of a logical stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// `OPEN` sent, waiting for `OKAY`.
    Opening,
    Open,
    /// One side has sent `CLSE`.
    HalfClosed(Side),
    Closed,
}

/// Result of the peer's `CLSE` on a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RemoteClose {
    /// The `OPEN` was refused.
    Rejected,
    /// Read half closed; the local side may still close.
    HalfClosed,
    /// Both sides closed; the stream can leave the table.
    Destroyed,
    Duplicate,
}

pub(crate) struct StreamShared {
    state: StreamState,
    remote_id: u32,
    /// True while the peer will accept one more `WRTE`.
    write_ready: bool,
    inbound: VecDeque<Bytes>,
    local_closed_at: Option<Instant>,
    disconnected: Option<String>,
}

impl StreamShared {
    fn local_closed(&self) -> bool {
        matches!(
            self.state,
            StreamState::HalfClosed(Side::Local) | StreamState::Closed
        )
    }

    fn remote_closed(&self) -> bool {
        matches!(
            self.state,
            StreamState::HalfClosed(Side::Remote) | StreamState::Closed
        )
    }
}

/// State shared between a stream handle and the dispatch thread.
pub(crate) struct StreamInner {
    local_id: u32,
    destination: String,
    shared: Mutex<StreamShared>,
    signal: Condvar,
}

impl StreamInner {
    pub(crate) fn opening(local_id: u32, destination: String) -> Self {
        Self::with_state(local_id, destination, StreamState::Opening, 0)
    }

    /// A stream the peer opened and this side has acknowledged.
    pub(crate) fn accepted(local_id: u32, remote_id: u32, destination: String) -> Self {
        Self::with_state(local_id, destination, StreamState::Open, remote_id)
    }

    fn with_state(local_id: u32, destination: String, state: StreamState, remote_id: u32) -> Self {
        Self {
            local_id,
            destination,
            shared: Mutex::new(StreamShared {
                state,
                remote_id,
                write_ready: state == StreamState::Open,
                inbound: VecDeque::new(),
                local_closed_at: None,
                disconnected: None,
            }),
            signal: Condvar::new(),
        }
    }

    pub(crate) fn local_id(&self) -> u32 {
        self.local_id
    }

    pub(crate) fn state(&self) -> StreamState {
        self.shared.lock().state
    }

    /// `OKAY` from the peer: either the open succeeded or a write was acknowledged.
    pub(crate) fn on_okay(&self, remote_id: u32) {
        let mut shared = self.shared.lock();
        let state = shared.state;
        match state {
            StreamState::Opening => {
                shared.state = StreamState::Open;
                shared.remote_id = remote_id;
                shared.write_ready = true;
                debug!(local_id = self.local_id, remote_id, destination = %self.destination, "stream opened");
            }
            _ if shared.remote_id != remote_id => {
                trace!(local_id = self.local_id, remote_id, "discarding OKAY from wrong remote id");
                return;
            }
            _ if shared.write_ready => {
                trace!(local_id = self.local_id, "discarding duplicate OKAY");
                return;
            }
            _ => shared.write_ready = true,
        }
        self.signal.notify_all();
    }

    /// Queue an inbound `WRTE` payload. Returns false if it was discarded.
    pub(crate) fn on_write(&self, payload: Bytes) -> bool {
        let mut shared = self.shared.lock();
        let state = shared.state;
        match state {
            StreamState::Open | StreamState::HalfClosed(Side::Local) => {
                shared.inbound.push_back(payload);
                self.signal.notify_all();
                true
            }
            state => {
                trace!(local_id = self.local_id, ?state, len = payload.len(), "discarding WRTE");
                false
            }
        }
    }

    pub(crate) fn on_close(&self) -> RemoteClose {
        let mut shared = self.shared.lock();
        let state = shared.state;
        let outcome = match state {
            StreamState::Opening => {
                shared.state = StreamState::Closed;
                RemoteClose::Rejected
            }
            StreamState::Open => {
                shared.state = StreamState::HalfClosed(Side::Remote);
                RemoteClose::HalfClosed
            }
            StreamState::HalfClosed(Side::Local) => {
                shared.state = StreamState::Closed;
                RemoteClose::Destroyed
            }
            StreamState::HalfClosed(Side::Remote) | StreamState::Closed => {
                return RemoteClose::Duplicate;
            }
        };
        self.signal.notify_all();
        outcome
    }

    /// Connection teardown: every pending and future call fails.
    pub(crate) fn disconnect(&self, reason: &str) {
        let mut shared = self.shared.lock();
        if shared.disconnected.is_none() {
            shared.disconnected = Some(reason.to_string());
        }
        shared.write_ready = false;
        self.signal.notify_all();
    }

    /// Force-close a stream whose peer never answered our `CLSE`.
    pub(crate) fn expire_close(&self, now: Instant, timeout: Duration) -> bool {
        let mut shared = self.shared.lock();
        let overdue = shared.state == StreamState::HalfClosed(Side::Local)
            && shared
                .local_closed_at
                .is_some_and(|at| now.duration_since(at) >= timeout);
        if overdue {
            shared.state = StreamState::Closed;
            self.signal.notify_all();
            warn!(
                local_id = self.local_id,
                remote_id = shared.remote_id,
                destination = %self.destination,
                "peer never closed stream; dropping it"
            );
        }
        overdue
    }

    /// Give up on a pending open. Returns false if the open already resolved.
    pub(crate) fn abandon_open(&self) -> bool {
        let mut shared = self.shared.lock();
        if shared.state != StreamState::Opening {
            return false;
        }
        shared.state = StreamState::Closed;
        true
    }

    /// Block until the open resolves or `deadline` passes.
    pub(crate) fn wait_open(&self, deadline: Instant) -> Result<Option<StreamState>> {
        let mut shared = self.shared.lock();
        loop {
            if let Some(reason) = &shared.disconnected {
                return Err(ProtocolError::Disconnected(reason.clone()));
            }
            if shared.state != StreamState::Opening {
                return Ok(Some(shared.state));
            }
            if self.signal.wait_until(&mut shared, deadline).timed_out()
                && shared.state == StreamState::Opening
            {
                return Ok(None);
            }
        }
    }
}

/// One multiplexed conversation with a service on the device.
///
/// All methods take `&self`; a stream can be shared between a reading and
/// a writing thread. Dropping the handle closes the stream.
pub struct LogicalStream {
    link: Arc<Link>,
    inner: Arc<StreamInner>,
}

impl LogicalStream {
    pub(crate) fn new(link: Arc<Link>, inner: Arc<StreamInner>) -> Self {
        Self { link, inner }
    }

    pub fn local_id(&self) -> u32 {
        self.inner.local_id
    }

    pub fn remote_id(&self) -> u32 {
        self.inner.shared.lock().remote_id
    }

    /// The service string this stream was opened to.
    pub fn destination(&self) -> &str {
        &self.inner.destination
    }

    pub fn state(&self) -> StreamState {
        self.inner.state()
    }

    /// Negotiated payload limit; `send` splits larger buffers.
    pub fn max_payload(&self) -> usize {
        self.link.max_payload()
    }

    /// Send `data`, one `WRTE` per `max_payload` bytes.
    ///
    /// Each `WRTE` waits until the previous one was acknowledged. Fails with
    /// [`ProtocolError::StreamClosed`] once either side has closed.
    pub fn send(&self, data: &[u8]) -> Result<()> {
        for chunk in data.chunks(self.link.max_payload()) {
            let remote_id = self.acquire_write_window()?;
            self.link.send(&Message::write(
                self.inner.local_id,
                remote_id,
                Bytes::copy_from_slice(chunk),
            ))?;
        }
        Ok(())
    }

    fn acquire_write_window(&self) -> Result<u32> {
        let mut shared = self.inner.shared.lock();
        loop {
            if let Some(reason) = &shared.disconnected {
                return Err(ProtocolError::Disconnected(reason.clone()));
            }
            if shared.state != StreamState::Open {
                return Err(ProtocolError::StreamClosed);
            }
            if shared.write_ready {
                shared.write_ready = false;
                return Ok(shared.remote_id);
            }
            self.inner.signal.wait(&mut shared);
        }
    }

    /// Next chunk of data, or `None` at end of stream.
    ///
    /// A call already waiting when [`close`](Self::close) runs returns
    /// `None`. A call made after the local close keeps delivering data until
    /// the peer closes, for at most `close_timeout`.
    pub fn receive(&self) -> Result<Option<Bytes>> {
        let (data, ack_to) = {
            let mut shared = self.inner.shared.lock();
            let started_closed = shared.local_closed();
            let deadline =
                started_closed.then(|| Instant::now() + self.link.config().close_timeout);
            loop {
                if let Some(reason) = &shared.disconnected {
                    return Err(ProtocolError::Disconnected(reason.clone()));
                }
                if let Some(data) = shared.inbound.pop_front() {
                    let ack_to = (shared.state == StreamState::Open).then_some(shared.remote_id);
                    break (data, ack_to);
                }
                if shared.remote_closed() || (shared.local_closed() && !started_closed) {
                    return Ok(None);
                }
                match deadline {
                    Some(deadline) => {
                        if Instant::now() >= deadline {
                            return Ok(None);
                        }
                        self.inner.signal.wait_until(&mut shared, deadline);
                    }
                    None => self.inner.signal.wait(&mut shared),
                }
            }
        };

        if let Some(remote_id) = ack_to {
            self.link
                .send(&Message::okay(self.inner.local_id, remote_id))?;
        }
        Ok(Some(data))
    }

    /// Collect everything up to end of stream.
    pub fn read_to_end(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.receive()? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    /// Send `CLSE`. Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        let (remote_id, destroyed) = {
            let mut shared = self.inner.shared.lock();
            let state = shared.state;
            let next = match state {
                StreamState::Open => StreamState::HalfClosed(Side::Local),
                StreamState::HalfClosed(Side::Remote) => StreamState::Closed,
                StreamState::Opening => {
                    shared.state = StreamState::Closed;
                    self.inner.signal.notify_all();
                    return Ok(());
                }
                StreamState::HalfClosed(Side::Local) | StreamState::Closed => return Ok(()),
            };
            shared.state = next;
            shared.local_closed_at = Some(Instant::now());
            self.inner.signal.notify_all();
            if shared.disconnected.is_some() {
                return Ok(());
            }
            (shared.remote_id, next == StreamState::Closed)
        };

        debug!(local_id = self.inner.local_id, remote_id, "closing stream");
        let sent = self
            .link
            .send(&Message::close(self.inner.local_id, remote_id));
        if destroyed {
            self.link.retire(self.inner.local_id);
        }
        sent
    }
}

impl Drop for LogicalStream {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(local_id = self.inner.local_id, error = %err, "close on drop failed");
        }
    }
}

impl fmt::Debug for LogicalStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogicalStream")
            .field("local_id", &self.local_id())
            .field("remote_id", &self.remote_id())
            .field("destination", &self.destination())
            .field("state", &self.state())
            .finish()
    }
}
