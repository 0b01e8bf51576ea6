use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, SyncError};

/// Sync frame header: id (4) + length-or-argument (4).
pub const SYNC_HEADER_SIZE: usize = 8;

/// Largest `DATA` chunk `adbd` accepts.
pub const SYNC_DATA_MAX: usize = 64 * 1024;

/// Longest remote path `adbd` accepts.
pub const MAX_PATH_LEN: usize = 1024;

const STAT_FRAME_SIZE: usize = 16;
const DENT_HEADER_SIZE: usize = 20;

/// Sync frame identifiers (little-endian ASCII tags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SyncId {
    List = u32::from_le_bytes(*b"LIST"),
    Stat = u32::from_le_bytes(*b"STAT"),
    Send = u32::from_le_bytes(*b"SEND"),
    Recv = u32::from_le_bytes(*b"RECV"),
    Dent = u32::from_le_bytes(*b"DENT"),
    Data = u32::from_le_bytes(*b"DATA"),
    Done = u32::from_le_bytes(*b"DONE"),
    Okay = u32::from_le_bytes(*b"OKAY"),
    Fail = u32::from_le_bytes(*b"FAIL"),
    Quit = u32::from_le_bytes(*b"QUIT"),
}

impl SyncId {
    const ALL: [SyncId; 10] = [
        SyncId::List,
        SyncId::Stat,
        SyncId::Send,
        SyncId::Recv,
        SyncId::Dent,
        SyncId::Data,
        SyncId::Done,
        SyncId::Okay,
        SyncId::Fail,
        SyncId::Quit,
    ];

    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|id| id.as_u32() == value)
    }

    pub fn tag(self) -> [u8; 4] {
        self.as_u32().to_le_bytes()
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.tag()))
    }
}

/// Which request a response stream belongs to.
///
/// `DONE` is 20 bytes when it ends a listing and 8 bytes otherwise, and
/// `STAT` responses have no length field, so responses only decode
/// unambiguously relative to the request that caused them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stat,
    List,
    Send,
    Recv,
}

/// `mode`/`size`/`mtime` as reported by `STAT` and `DENT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileStat {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

impl FileStat {
    const TYPE_MASK: u32 = 0o170_000;

    /// `adbd` reports an all-zero stat for paths that do not exist.
    pub fn exists(&self) -> bool {
        self.mode != 0 || self.size != 0 || self.mtime != 0
    }

    pub fn is_dir(&self) -> bool {
        self.mode & Self::TYPE_MASK == 0o040_000
    }

    pub fn is_file(&self) -> bool {
        self.mode & Self::TYPE_MASK == 0o100_000
    }

    pub fn is_symlink(&self) -> bool {
        self.mode & Self::TYPE_MASK == 0o120_000
    }

    /// Permission bits only.
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub stat: FileStat,
}

/// Host-to-device sync frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncRequest {
    List(String),
    Stat(String),
    /// Start a push; the daemon creates `path` with `mode`.
    Send { path: String, mode: u32 },
    Recv(String),
    Data(Bytes),
    /// Ends a push; `mtime` is applied to the written file.
    Done { mtime: u32 },
    Quit,
}

/// Device-to-host sync frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncResponse {
    Stat(FileStat),
    Dent(DirEntry),
    Data(Bytes),
    Done,
    Okay,
    /// Failure text exactly as the daemon sent it.
    Fail(String),
}

/// Largest `DATA` chunk that still fits one outer message of `max_payload`.
pub fn chunk_size(max_payload: usize) -> usize {
    SYNC_DATA_MAX
        .min(max_payload.saturating_sub(SYNC_HEADER_SIZE))
        .max(1)
}

/// Encode a request frame.
pub fn encode_request(request: &SyncRequest, dst: &mut BytesMut) -> Result<()> {
    match request {
        SyncRequest::List(path) => put_path(dst, SyncId::List, path),
        SyncRequest::Stat(path) => put_path(dst, SyncId::Stat, path),
        SyncRequest::Recv(path) => put_path(dst, SyncId::Recv, path),
        SyncRequest::Send { path, mode } => put_path(dst, SyncId::Send, &format!("{path},{mode}")),
        SyncRequest::Data(data) => put_data(dst, SyncId::Data, data),
        SyncRequest::Done { mtime } => {
            put_header(dst, SyncId::Done, *mtime);
            Ok(())
        }
        SyncRequest::Quit => {
            put_header(dst, SyncId::Quit, 0);
            Ok(())
        }
    }
}

/// Decode one request frame; `Ok(None)` means more bytes are needed.
pub fn decode_request(src: &mut BytesMut, max_data: usize) -> Result<Option<SyncRequest>> {
    let Some((id, arg)) = peek_header(src)? else {
        return Ok(None);
    };

    let request = match id {
        SyncId::List | SyncId::Stat | SyncId::Recv | SyncId::Send => {
            let len = arg as usize;
            if len > MAX_PATH_LEN {
                return Err(SyncError::PathTooLong {
                    len,
                    max: MAX_PATH_LEN,
                });
            }
            let Some(body) = take_body(src, len) else {
                return Ok(None);
            };
            let text = utf8(&body, "path")?;
            match id {
                SyncId::List => SyncRequest::List(text),
                SyncId::Stat => SyncRequest::Stat(text),
                SyncId::Recv => SyncRequest::Recv(text),
                _ => parse_send(&text)?,
            }
        }
        SyncId::Data => {
            check_len(arg, max_data)?;
            let Some(body) = take_body(src, arg as usize) else {
                return Ok(None);
            };
            SyncRequest::Data(body)
        }
        SyncId::Done => {
            src.advance(SYNC_HEADER_SIZE);
            SyncRequest::Done { mtime: arg }
        }
        SyncId::Quit => {
            src.advance(SYNC_HEADER_SIZE);
            SyncRequest::Quit
        }
        other => {
            return Err(SyncError::Malformed(format!(
                "unexpected {other} frame in request stream"
            )))
        }
    };
    Ok(Some(request))
}

/// Encode a response frame for `phase`.
pub fn encode_response(response: &SyncResponse, phase: Phase, dst: &mut BytesMut) -> Result<()> {
    match response {
        SyncResponse::Stat(stat) => {
            put_header(dst, SyncId::Stat, stat.mode);
            dst.put_u32_le(stat.size);
            dst.put_u32_le(stat.mtime);
        }
        SyncResponse::Dent(entry) => {
            let name = entry.name.as_bytes();
            if name.len() > MAX_PATH_LEN {
                return Err(SyncError::PathTooLong {
                    len: name.len(),
                    max: MAX_PATH_LEN,
                });
            }
            put_header(dst, SyncId::Dent, entry.stat.mode);
            dst.put_u32_le(entry.stat.size);
            dst.put_u32_le(entry.stat.mtime);
            dst.put_u32_le(name.len() as u32);
            dst.put_slice(name);
        }
        SyncResponse::Done if phase == Phase::List => {
            put_header(dst, SyncId::Done, 0);
            dst.put_bytes(0, DENT_HEADER_SIZE - SYNC_HEADER_SIZE);
        }
        SyncResponse::Done => put_header(dst, SyncId::Done, 0),
        SyncResponse::Data(data) => put_data(dst, SyncId::Data, data)?,
        SyncResponse::Okay => put_header(dst, SyncId::Okay, 0),
        SyncResponse::Fail(message) => put_data(dst, SyncId::Fail, message.as_bytes())?,
    }
    Ok(())
}

/// Decode one response frame for `phase`; `Ok(None)` means more bytes are needed.
pub fn decode_response(
    src: &mut BytesMut,
    phase: Phase,
    max_data: usize,
) -> Result<Option<SyncResponse>> {
    let Some((id, arg)) = peek_header(src)? else {
        return Ok(None);
    };

    let response = match (id, phase) {
        (SyncId::Stat, Phase::Stat) => {
            if src.len() < STAT_FRAME_SIZE {
                return Ok(None);
            }
            src.advance(SYNC_HEADER_SIZE);
            let size = src.get_u32_le();
            let mtime = src.get_u32_le();
            SyncResponse::Stat(FileStat {
                mode: arg,
                size,
                mtime,
            })
        }
        (SyncId::Dent, Phase::List) => {
            if src.len() < DENT_HEADER_SIZE {
                return Ok(None);
            }
            let mut fixed = &src[SYNC_HEADER_SIZE..DENT_HEADER_SIZE];
            let size = fixed.get_u32_le();
            let mtime = fixed.get_u32_le();
            let name_len = fixed.get_u32_le() as usize;
            if name_len > MAX_PATH_LEN {
                return Err(SyncError::PathTooLong {
                    len: name_len,
                    max: MAX_PATH_LEN,
                });
            }
            if src.len() < DENT_HEADER_SIZE + name_len {
                return Ok(None);
            }
            src.advance(DENT_HEADER_SIZE);
            let name = utf8(&src.split_to(name_len), "entry name")?;
            SyncResponse::Dent(DirEntry {
                name,
                stat: FileStat {
                    mode: arg,
                    size,
                    mtime,
                },
            })
        }
        (SyncId::Done, Phase::List) => {
            if src.len() < DENT_HEADER_SIZE {
                return Ok(None);
            }
            src.advance(DENT_HEADER_SIZE);
            SyncResponse::Done
        }
        (SyncId::Done, _) => {
            src.advance(SYNC_HEADER_SIZE);
            SyncResponse::Done
        }
        (SyncId::Data, Phase::Recv) => {
            check_len(arg, max_data)?;
            let Some(body) = take_body(src, arg as usize) else {
                return Ok(None);
            };
            SyncResponse::Data(body)
        }
        (SyncId::Okay, _) => {
            src.advance(SYNC_HEADER_SIZE);
            SyncResponse::Okay
        }
        (SyncId::Fail, _) => {
            check_len(arg, max_data)?;
            let Some(body) = take_body(src, arg as usize) else {
                return Ok(None);
            };
            SyncResponse::Fail(String::from_utf8_lossy(&body).into_owned())
        }
        (other, phase) => {
            return Err(SyncError::Malformed(format!(
                "unexpected {other} frame while in {phase:?} phase"
            )))
        }
    };
    Ok(Some(response))
}

fn put_header(dst: &mut BytesMut, id: SyncId, arg: u32) {
    dst.reserve(SYNC_HEADER_SIZE);
    dst.put_u32_le(id.as_u32());
    dst.put_u32_le(arg);
}

fn put_path(dst: &mut BytesMut, id: SyncId, path: &str) -> Result<()> {
    if path.len() > MAX_PATH_LEN {
        return Err(SyncError::PathTooLong {
            len: path.len(),
            max: MAX_PATH_LEN,
        });
    }
    put_data(dst, id, path.as_bytes())
}

fn put_data(dst: &mut BytesMut, id: SyncId, data: &[u8]) -> Result<()> {
    if data.len() > u32::MAX as usize {
        return Err(SyncError::PayloadTooLarge {
            size: data.len(),
            max: u32::MAX as usize,
        });
    }
    put_header(dst, id, data.len() as u32);
    dst.put_slice(data);
    Ok(())
}

fn peek_header(src: &BytesMut) -> Result<Option<(SyncId, u32)>> {
    if src.len() < SYNC_HEADER_SIZE {
        return Ok(None);
    }
    let mut header = &src[..SYNC_HEADER_SIZE];
    let raw = header.get_u32_le();
    let arg = header.get_u32_le();
    let id = SyncId::from_u32(raw).ok_or_else(|| {
        SyncError::Malformed(format!(
            "unknown sync id {:?}",
            String::from_utf8_lossy(&raw.to_le_bytes())
        ))
    })?;
    Ok(Some((id, arg)))
}

/// Split off header + `len` body bytes if they are all buffered.
fn take_body(src: &mut BytesMut, len: usize) -> Option<Bytes> {
    if src.len() < SYNC_HEADER_SIZE + len {
        return None;
    }
    src.advance(SYNC_HEADER_SIZE);
    Some(src.split_to(len).freeze())
}

fn check_len(len: u32, max: usize) -> Result<()> {
    if len as usize > max {
        return Err(SyncError::PayloadTooLarge {
            size: len as usize,
            max,
        });
    }
    Ok(())
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| SyncError::Malformed(format!("{what} is not UTF-8")))
}

fn parse_send(target: &str) -> Result<SyncRequest> {
    let (path, mode) = target
        .rsplit_once(',')
        .ok_or_else(|| SyncError::Malformed(format!("SEND target '{target}' has no mode")))?;
    let mode = mode
        .parse::<u32>()
        .map_err(|_| SyncError::Malformed(format!("SEND mode '{mode}' is not a number")))?;
    Ok(SyncRequest::Send {
        path: path.to_string(),
        mode,
    })
}
