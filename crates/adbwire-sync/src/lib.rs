//! Codec for the ADB file-sync sub-protocol.
//!
//! Once a stream is opened to `sync:`, its payload bytes are a sequence of
//! sync frames: a 4-byte ASCII id, a 4-byte little-endian argument (usually
//! a length), then the body. There is no checksum; integrity comes from the
//! outer message checksum.

pub mod codec;
pub mod error;

pub use codec::{
    chunk_size, decode_request, decode_response, encode_request, encode_response, DirEntry,
    FileStat, Phase, SyncId, SyncRequest, SyncResponse, MAX_PATH_LEN, SYNC_DATA_MAX,
    SYNC_HEADER_SIZE,
};
pub use error::{Result, SyncError};
