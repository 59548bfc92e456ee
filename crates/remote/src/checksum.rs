//! Full-object checksums in the encoding S3 reports them.
//!
//! S3 exposes `x-amz-checksum-crc32` as the base64 rendering of the four
//! big-endian CRC-32 bytes. Comparing a locally computed value against a
//! probe result lets an upload be skipped without moving the body.

use std::io::{self, Write};

use base64::{Engine, engine::general_purpose::STANDARD};
use crc32fast::Hasher;

/// Encodes a raw CRC-32 value the way S3 reports it.
pub fn encode_crc32(value: u32) -> String {
    STANDARD.encode(value.to_be_bytes())
}

/// Computes the encoded checksum of `data`.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(data);
    encode_crc32(hasher.finalize())
}

/// Returns `true` for checksums that cover the whole object.
///
/// Multipart uploads stored with composite checksums report
/// `<base64>-<parts>`, which cannot be compared to a full-object value.
pub fn is_full_object(checksum: &str) -> bool {
    !checksum.contains('-')
}

/// A sink that counts and checksums everything written to it.
#[derive(Debug, Clone, Default)]
pub struct ChecksumAccumulator {
    hasher: Hasher,
    len: u64,
}

impl ChecksumAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes seen so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Feeds `data` into the checksum.
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.len += data.len() as u64;
    }

    /// Returns the total size and the encoded checksum.
    pub fn finish(self) -> (u64, String) {
        (self.len, encode_crc32(self.hasher.finalize()))
    }
}

impl Write for ChecksumAccumulator {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
