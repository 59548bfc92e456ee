//! In-process object store.
//!
//! Behaves like a bucket for the transfer engine: chunked reads and
//! writes, optional checksum reporting, and counters for the calls that
//! move data so callers can observe what a transfer actually did.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::checksum::checksum_bytes;
use crate::{ObjectMetadata, ObjectStore, PART_SIZE, StoreError, read_part};

const NO_LIMIT: u64 = u64::MAX;

fn connection_reset(op: &'static str, key: &str) -> StoreError {
    StoreError::Request {
        op,
        key: key.to_string(),
        message: "connection reset".into(),
    }
}

/// Objects held in memory, keyed like a bucket.
#[derive(Debug)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    part_size: usize,
    report_checksums: bool,
    fail_deletes: AtomicBool,
    fail_puts_after: AtomicU64,
    fail_gets_after: AtomicU64,
    puts: AtomicUsize,
    gets: AtomicUsize,
    deletes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store that reports checksums and uses [`PART_SIZE`].
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            part_size: PART_SIZE,
            report_checksums: true,
            fail_deletes: AtomicBool::new(false),
            fail_puts_after: AtomicU64::new(NO_LIMIT),
            fail_gets_after: AtomicU64::new(NO_LIMIT),
            puts: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Uses `part_size` byte parts for chunked reads and writes.
    ///
    /// If `part_size` is 0, [`PART_SIZE`] is used.
    pub fn with_part_size(mut self, part_size: usize) -> Self {
        self.part_size = if part_size == 0 { PART_SIZE } else { part_size };
        self
    }

    /// Leaves checksums out of probe results, like stores without checksum support.
    pub fn without_checksums(mut self) -> Self {
        self.report_checksums = false;
        self
    }

    /// Makes every later delete fail.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Makes later puts fail once more than `bytes` have been read from the
    /// body. Nothing is stored by a failed put. `None` lifts the limit.
    pub fn set_fail_puts_after(&self, bytes: Option<u64>) {
        self.fail_puts_after
            .store(bytes.unwrap_or(NO_LIMIT), Ordering::SeqCst);
    }

    /// Makes later gets fail after writing `bytes` of the object, as if the
    /// connection dropped mid-body. `None` lifts the limit.
    pub fn set_fail_gets_after(&self, bytes: Option<u64>) {
        self.fail_gets_after
            .store(bytes.unwrap_or(NO_LIMIT), Ordering::SeqCst);
    }

    /// Stores `data` at `key` directly, without counting it as a put.
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.lock().insert(key.into(), data.into());
    }

    /// Returns a copy of the object at `key`.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.lock().get(key).cloned()
    }

    /// All keys in lexical order.
    pub fn keys(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    /// Number of completed `put` calls.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Number of completed `get` calls.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of completed `delete` calls.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ObjectStore for MemoryStore {
    fn head(&self, key: &str, with_checksum: bool) -> Result<Option<ObjectMetadata>, StoreError> {
        let objects = self.lock();
        Ok(objects.get(key).map(|data| ObjectMetadata {
            content_length: Some(data.len() as u64),
            checksum: (with_checksum && self.report_checksums).then(|| checksum_bytes(data)),
        }))
    }

    fn put(&self, key: &str, body: &mut dyn Read) -> Result<u64, StoreError> {
        // Parts are staged and only become visible once the body ends,
        // like a completed multipart upload.
        let limit = self.fail_puts_after.load(Ordering::SeqCst);
        let mut staged = Vec::new();
        loop {
            let part = read_part(body, self.part_size)?;
            if part.is_empty() {
                break;
            }
            staged.extend_from_slice(&part);
            if staged.len() as u64 > limit {
                debug!(key, staged = staged.len(), "memory store: put dropped");
                return Err(connection_reset("put", key));
            }
        }
        let len = staged.len() as u64;
        self.lock().insert(key.to_string(), staged);
        self.puts.fetch_add(1, Ordering::SeqCst);
        debug!(key, len, "memory store: put");
        Ok(len)
    }

    fn get(&self, key: &str, sink: &mut dyn Write) -> Result<u64, StoreError> {
        let data = self
            .object(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let limit = self.fail_gets_after.load(Ordering::SeqCst);
        let mut written = 0u64;
        for part in data.chunks(self.part_size) {
            let room = limit - written;
            if (part.len() as u64) > room {
                // `room` is below `part.len()`, so it fits in usize.
                sink.write_all(&part[..room as usize])?;
                debug!(key, written = limit, "memory store: get dropped");
                return Err(connection_reset("get", key));
            }
            sink.write_all(part)?;
            written += part.len() as u64;
        }
        sink.flush()?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(data.len() as u64)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Request {
                op: "delete",
                key: key.to_string(),
                message: "deletes disabled".into(),
            });
        }
        self.lock().remove(key);
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
