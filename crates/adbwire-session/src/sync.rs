use std::io::{Read, Write};

use adbwire_sync::{
    chunk_size, decode_response, encode_request, DirEntry, FileStat, Phase, SyncRequest,
    SyncResponse, SYNC_DATA_MAX,
};
use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::stream::LogicalStream;

/// File transfer over a `sync:` stream.
///
/// Requests run one at a time; each method reads the full response before
/// returning. A `FAIL` from the daemon becomes
/// [`ProtocolError::SyncFailed`] and leaves the client usable.
pub struct SyncClient {
    stream: LogicalStream,
    inbound: BytesMut,
    outbound: BytesMut,
}

impl SyncClient {
    pub fn new(stream: LogicalStream) -> Self {
        Self {
            stream,
            inbound: BytesMut::new(),
            outbound: BytesMut::new(),
        }
    }

    /// Largest `DATA` chunk a push sends on this connection.
    pub fn chunk_size(&self) -> usize {
        chunk_size(self.stream.max_payload())
    }

    /// Mode, size, and mtime of a remote path. A missing path reports all zeros.
    pub fn stat(&mut self, path: &str) -> Result<FileStat> {
        self.request(&SyncRequest::Stat(path.to_string()))?;
        match self.response(Phase::Stat)? {
            SyncResponse::Stat(stat) => Ok(stat),
            other => Err(unexpected(&other, Phase::Stat)),
        }
    }

    /// Entries of a remote directory, as the daemon reports them.
    pub fn list(&mut self, path: &str) -> Result<Vec<DirEntry>> {
        self.request(&SyncRequest::List(path.to_string()))?;
        let mut entries = Vec::new();
        loop {
            match self.response(Phase::List)? {
                SyncResponse::Dent(entry) => entries.push(entry),
                SyncResponse::Done => return Ok(entries),
                other => return Err(unexpected(&other, Phase::List)),
            }
        }
    }

    /// Upload everything `source` yields to `path`, created with `mode` and
    /// stamped with `mtime`. Returns the number of bytes sent.
    pub fn push<R: Read>(&mut self, source: &mut R, path: &str, mode: u32, mtime: u32) -> Result<u64> {
        self.request(&SyncRequest::Send {
            path: path.to_string(),
            mode,
        })?;

        let mut chunk = vec![0u8; self.chunk_size()];
        let mut total = 0u64;
        loop {
            let filled = fill(source, &mut chunk)?;
            if filled == 0 {
                break;
            }
            self.request(&SyncRequest::Data(Bytes::copy_from_slice(&chunk[..filled])))?;
            total += filled as u64;
            if filled < chunk.len() {
                break;
            }
        }

        self.request(&SyncRequest::Done { mtime })?;
        match self.response(Phase::Send)? {
            SyncResponse::Okay => {
                debug!(path, bytes = total, "push complete");
                Ok(total)
            }
            other => Err(unexpected(&other, Phase::Send)),
        }
    }

    /// Download `path` into `sink`. Returns the number of bytes received.
    pub fn pull<W: Write>(&mut self, path: &str, sink: &mut W) -> Result<u64> {
        self.request(&SyncRequest::Recv(path.to_string()))?;
        let mut total = 0u64;
        loop {
            match self.response(Phase::Recv)? {
                SyncResponse::Data(data) => {
                    sink.write_all(&data)?;
                    total += data.len() as u64;
                }
                SyncResponse::Done => break,
                other => return Err(unexpected(&other, Phase::Recv)),
            }
        }
        sink.flush()?;
        debug!(path, bytes = total, "pull complete");
        Ok(total)
    }

    /// End the sync session and close the stream.
    pub fn quit(mut self) -> Result<()> {
        self.request(&SyncRequest::Quit)?;
        self.stream.close()
    }

    pub fn stream(&self) -> &LogicalStream {
        &self.stream
    }

    fn request(&mut self, request: &SyncRequest) -> Result<()> {
        self.outbound.clear();
        encode_request(request, &mut self.outbound)?;
        self.stream.send(&self.outbound)
    }

    fn response(&mut self, phase: Phase) -> Result<SyncResponse> {
        loop {
            if let Some(response) = decode_response(&mut self.inbound, phase, SYNC_DATA_MAX)? {
                if let SyncResponse::Fail(message) = response {
                    return Err(ProtocolError::SyncFailed(message));
                }
                return Ok(response);
            }
            match self.stream.receive()? {
                Some(data) => self.inbound.extend_from_slice(&data),
                None => {
                    return Err(ProtocolError::Disconnected(
                        "sync stream closed mid-response".to_string(),
                    ))
                }
            }
        }
    }
}

/// Read until `buf` is full or the source is exhausted.
fn fill<R: Read>(source: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Ok(filled)
}

fn unexpected(response: &SyncResponse, phase: Phase) -> ProtocolError {
    let kind = match response {
        SyncResponse::Stat(_) => "STAT",
        SyncResponse::Dent(_) => "DENT",
        SyncResponse::Data(_) => "DATA",
        SyncResponse::Done => "DONE",
        SyncResponse::Okay => "OKAY",
        SyncResponse::Fail(_) => "FAIL",
    };
    ProtocolError::UnexpectedMessage(format!("sync {kind} during {phase:?}"))
}

#[cfg(all(test, unix))]
mod tests {
    use std::thread;

    use adbwire_message::{Command, Message};
    use adbwire_sync::{decode_request, encode_response};

    use super::*;
    use crate::connection::Connection;
    use crate::testing::{connected, connected_with_max, fast_config, FakeDevice};

    /// Device side of a `sync:` stream.
    struct SyncPeer {
        device: FakeDevice,
        local_id: u32,
        remote_id: u32,
        pending: BytesMut,
    }

    impl SyncPeer {
        fn accept(mut device: FakeDevice) -> Self {
            let (local_id, destination) = device.accept_open(1000);
            assert_eq!(destination, "sync:");
            Self {
                device,
                local_id,
                remote_id: 1000,
                pending: BytesMut::new(),
            }
        }

        fn request(&mut self) -> SyncRequest {
            loop {
                if let Some(request) = decode_request(&mut self.pending, SYNC_DATA_MAX).unwrap() {
                    return request;
                }
                let write = self.device.recv_write();
                self.pending.extend_from_slice(&write.payload);
            }
        }

        fn respond(&mut self, response: SyncResponse, phase: Phase) {
            let mut out = BytesMut::new();
            encode_response(&response, phase, &mut out).unwrap();
            self.device.send(Message::write(self.remote_id, self.local_id, out.freeze()));
            let ack = self.device.expect(Command::Okay);
            assert_eq!(ack.arg1, self.remote_id);
        }
    }

    fn sync_session(max_payload: u32) -> (Connection, thread::JoinHandle<SyncPeer>) {
        let (conn, device) = connected_with_max(fast_config(), max_payload);
        let peer = thread::spawn(move || SyncPeer::accept(device));
        (conn, peer)
    }

    #[test]
    fn push_splits_into_chunks_then_done() {
        let (conn, peer) = sync_session(1032);
        let mut client = conn.sync().unwrap();
        let mut peer = peer.join().unwrap();
        assert_eq!(client.chunk_size(), 1024);

        let content: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let device = thread::spawn(move || {
            let send = peer.request();
            assert_eq!(
                send,
                SyncRequest::Send {
                    path: "/data/local/tmp/blob".to_string(),
                    mode: 0o100644
                }
            );
            let mut received = Vec::new();
            let mut chunks = Vec::new();
            let mtime = loop {
                match peer.request() {
                    SyncRequest::Data(data) => {
                        chunks.push(data.len());
                        received.extend_from_slice(&data);
                    }
                    SyncRequest::Done { mtime } => break mtime,
                    other => panic!("unexpected {other:?}"),
                }
            };
            peer.respond(SyncResponse::Okay, Phase::Send);
            (received, chunks, mtime)
        });

        let sent = client
            .push(&mut content.as_slice(), "/data/local/tmp/blob", 0o100644, 1_700_000_000)
            .unwrap();
        assert_eq!(sent, 2500);

        let (received, chunks, mtime) = device.join().unwrap();
        assert_eq!(received, content);
        assert_eq!(chunks, vec![1024, 1024, 452]);
        assert_eq!(mtime, 1_700_000_000);
    }

    #[test]
    fn pull_collects_data_until_done() {
        let (conn, peer) = sync_session(64 * 1024);
        let mut client = conn.sync().unwrap();
        let mut peer = peer.join().unwrap();

        let device = thread::spawn(move || {
            let recv = peer.request();
            assert_eq!(recv, SyncRequest::Recv("/system/build.prop".to_string()));
            peer.respond(SyncResponse::Data(Bytes::from_static(b"ro.build.id=")), Phase::Recv);
            peer.respond(SyncResponse::Data(Bytes::from_static(b"UQ1A\n")), Phase::Recv);
            peer.respond(SyncResponse::Done, Phase::Recv);
        });

        let mut sink = Vec::new();
        let pulled = client.pull("/system/build.prop", &mut sink).unwrap();
        assert_eq!(pulled, 17);
        assert_eq!(sink, b"ro.build.id=UQ1A\n");
        device.join().unwrap();
    }

    #[test]
    fn stat_and_list() {
        let (conn, peer) = sync_session(64 * 1024);
        let mut client = conn.sync().unwrap();
        let mut peer = peer.join().unwrap();

        let device = thread::spawn(move || {
            assert_eq!(peer.request(), SyncRequest::Stat("/sdcard".to_string()));
            peer.respond(
                SyncResponse::Stat(FileStat {
                    mode: 0o040771,
                    size: 4096,
                    mtime: 10,
                }),
                Phase::Stat,
            );

            assert_eq!(peer.request(), SyncRequest::List("/sdcard".to_string()));
            for name in ["DCIM", "Download"] {
                peer.respond(
                    SyncResponse::Dent(DirEntry {
                        name: name.to_string(),
                        stat: FileStat {
                            mode: 0o040771,
                            size: 4096,
                            mtime: 11,
                        },
                    }),
                    Phase::List,
                );
            }
            peer.respond(SyncResponse::Done, Phase::List);
        });

        let stat = client.stat("/sdcard").unwrap();
        assert!(stat.is_dir());
        let names: Vec<String> = client
            .list("/sdcard")
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, ["DCIM", "Download"]);
        device.join().unwrap();
    }

    #[test]
    fn fail_text_surfaces_verbatim() {
        let (conn, peer) = sync_session(64 * 1024);
        let mut client = conn.sync().unwrap();
        let mut peer = peer.join().unwrap();

        let device = thread::spawn(move || {
            peer.request();
            peer.respond(
                SyncResponse::Fail("open failed: No such file or directory".to_string()),
                Phase::Recv,
            );
            peer
        });

        let err = client.pull("/nope", &mut Vec::new()).unwrap_err();
        assert!(
            matches!(err, ProtocolError::SyncFailed(ref msg) if msg == "open failed: No such file or directory")
        );
        let _peer = device.join().unwrap();
    }

    #[test]
    fn quit_closes_stream() {
        let (conn, device) = connected(fast_config());
        let peer = thread::spawn(move || SyncPeer::accept(device));
        let client = conn.sync().unwrap();
        let mut peer = peer.join().unwrap();

        let device = thread::spawn(move || {
            assert_eq!(peer.request(), SyncRequest::Quit);
            peer.device.expect(Command::Clse)
        });
        client.quit().unwrap();
        let clse = device.join().unwrap();
        assert_eq!(clse.arg1, 1000);
    }
}
