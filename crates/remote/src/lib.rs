//! Remote object stores addressed by key.
//!
//! The [`ObjectStore`] trait is the seam between the transfer engine and
//! a bucket: metadata probes, chunked writes from a reader, chunked reads
//! into a writer, and deletes. [`S3Store`] talks to any S3-compatible
//! endpoint; [`MemoryStore`] keeps objects in process.

pub mod checksum;
pub mod memory;
pub mod s3;
mod unsigned;

use std::io::{Read, Write};

pub use checksum::{ChecksumAccumulator, checksum_bytes};
pub use memory::MemoryStore;
pub use s3::{S3Config, S3Store};

/// Size of each part in chunked transfers: 5 MiB, the S3 multipart minimum.
pub const PART_SIZE: usize = 5 * 1024 * 1024;

/// S3 refuses multipart uploads with more parts than this.
pub const MAX_PARTS: usize = 10_000;

/// Snapshot of a remote object's metadata from a probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Stored size in bytes, if the store reported one.
    pub content_length: Option<u64>,
    /// Full-object checksum in [`checksum`] encoding, if the store exposes one.
    pub checksum: Option<String>,
}

/// Errors produced by object stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{op} {key} failed: {message}")]
    Request {
        op: &'static str,
        key: String,
        message: String,
    },

    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object too large: {0}")]
    TooLarge(String),

    #[error("store configuration error: {0}")]
    Config(String),
}

/// Key-addressed blob storage.
///
/// Implementations are shared across transfers and must be safe to call
/// from several threads. All calls block until the remote side answers.
pub trait ObjectStore: Send + Sync {
    /// Fetches metadata for `key` without its body.
    ///
    /// Returns `Ok(None)` when the object does not exist. With
    /// `with_checksum` the store is asked to include its checksum.
    fn head(&self, key: &str, with_checksum: bool) -> Result<Option<ObjectMetadata>, StoreError>;

    /// Writes everything `body` yields to `key` in fixed-size parts.
    ///
    /// Returns the number of bytes stored.
    fn put(&self, key: &str, body: &mut dyn Read) -> Result<u64, StoreError>;

    /// Streams the object at `key` into `sink` in fixed-size parts.
    ///
    /// Returns the number of bytes written.
    fn get(&self, key: &str, sink: &mut dyn Write) -> Result<u64, StoreError>;

    /// Removes the object at `key`.
    fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// Reads from `body` until `buf` holds `limit` bytes or the body ends.
pub(crate) fn read_part(body: &mut dyn Read, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit.min(PART_SIZE));
    (&mut *body).take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn read_part_stops_at_limit() {
        let mut body = Cursor::new(b"0123456789".to_vec());
        assert_eq!(read_part(&mut body, 4).unwrap(), b"0123");
        assert_eq!(read_part(&mut body, 4).unwrap(), b"4567");
        assert_eq!(read_part(&mut body, 4).unwrap(), b"89");
        assert!(read_part(&mut body, 4).unwrap().is_empty());
    }
}
