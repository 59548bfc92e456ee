use std::fs::File;
use std::io::{self, BufReader, BufWriter};
use std::path::Path;
use std::sync::Arc;

use lfs_s3_compression::{Catalog, CompressionError, Variant};
use lfs_s3_remote::{ChecksumAccumulator, ObjectMetadata, ObjectStore, StoreError};
use tracing::{debug, info, warn};

use crate::error::{ConflictKind, TransferError};
use crate::progress::{ProgressReader, ProgressWriter};
use crate::resolver::Resolver;
use crate::session::{Direction, Session, SessionState};
use crate::validation::validate_oid;

/// Settings fixed for the lifetime of an [`Engine`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Key prefix inside the bucket; may be empty.
    pub root_path: String,
    /// Variant used for uploads; `None` picks the catalog default.
    pub upload_variant: Option<String>,
    /// After a new upload, delete copies stored under other variants.
    pub delete_other_variants: bool,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The object was written to `key`.
    Uploaded { key: String, bytes: u64 },
    /// `key` already held identical content; nothing was sent.
    AlreadyPresent { key: String },
}

impl UploadOutcome {
    pub fn key(&self) -> &str {
        match self {
            Self::Uploaded { key, .. } | Self::AlreadyPresent { key } => key,
        }
    }
}

/// Result of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub key: String,
    pub variant: &'static str,
    /// Encoded bytes fetched from the store.
    pub bytes: u64,
}

/// Moves objects between local files and the remote store.
///
/// Calls block the current thread and must not run inside an async
/// runtime when the store is network-backed.
pub struct Engine {
    resolver: Resolver,
    upload_variant: Arc<dyn Variant>,
    delete_other_variants: bool,
}

impl Engine {
    /// Creates an engine; fails if the configured upload variant is not in `catalog`.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        catalog: Arc<Catalog>,
        config: EngineConfig,
    ) -> Result<Self, TransferError> {
        let upload_variant = catalog.select(config.upload_variant.as_deref())?;
        let resolver = Resolver::new(store, catalog, &config.root_path);
        info!(
            upload_variant = upload_variant.name(),
            root_path = %config.root_path,
            delete_other_variants = config.delete_other_variants,
            "transfer engine ready"
        );
        Ok(Self {
            resolver,
            upload_variant,
            delete_other_variants: config.delete_other_variants,
        })
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn upload_variant(&self) -> &Arc<dyn Variant> {
        &self.upload_variant
    }

    /// Stores the file at `local_path` as `oid`.
    ///
    /// `on_progress` receives the encoded bytes as they leave for the
    /// store. It is never called when the object is already present.
    pub fn upload(
        &self,
        oid: &str,
        local_path: &Path,
        on_progress: &mut dyn FnMut(u64),
    ) -> Result<UploadOutcome, TransferError> {
        let mut session = Session::new(oid, Direction::Upload);
        let result = self.run_upload(&mut session, local_path, on_progress);
        match &result {
            Ok(UploadOutcome::Uploaded { key, bytes }) => {
                session.succeed();
                info!(oid, key = %key, bytes, elapsed = ?session.elapsed(), "upload complete");
            }
            Ok(UploadOutcome::AlreadyPresent { key }) => {
                session.succeed();
                info!(oid, key = %key, "object already present, upload skipped");
            }
            Err(e) => session.fail(e),
        }
        result
    }

    /// Fetches `oid` into `dest_path`, decoding it on the way.
    ///
    /// The variant is resolved before `dest_path` is touched, so a missing
    /// object leaves no file behind. A failure after that point leaves a
    /// partial file for the caller to clean up.
    pub fn download(
        &self,
        oid: &str,
        dest_path: &Path,
        on_progress: &mut dyn FnMut(u64),
    ) -> Result<DownloadOutcome, TransferError> {
        let mut session = Session::new(oid, Direction::Download);
        let result = self.run_download(&mut session, dest_path, on_progress);
        match &result {
            Ok(outcome) => {
                session.succeed();
                info!(
                    oid,
                    key = %outcome.key,
                    variant = outcome.variant,
                    bytes = outcome.bytes,
                    elapsed = ?session.elapsed(),
                    "download complete"
                );
            }
            Err(e) => session.fail(e),
        }
        result
    }

    fn run_upload(
        &self,
        session: &mut Session,
        local_path: &Path,
        on_progress: &mut dyn FnMut(u64),
    ) -> Result<UploadOutcome, TransferError> {
        let oid = session.oid().to_string();
        validate_oid(&oid)?;
        let file = File::open(local_path).map_err(|source| TransferError::LocalFile {
            path: local_path.to_path_buf(),
            source,
        })?;

        let variant = Arc::clone(&self.upload_variant);
        session.set_variant(variant.name());
        let key = self.resolver.key(&oid, variant.as_ref());
        let mut reader = variant.wrap_read(Box::new(BufReader::new(file)))?;

        session.advance(SessionState::Probing);
        let existing = match self.resolver.probe(&oid, variant.as_ref(), true) {
            Ok(existing) => existing,
            Err(e) => return settle(Err(e.into()), reader.finish()),
        };

        if let Some(meta) = existing {
            let mut local = ChecksumAccumulator::new();
            let verdict = io::copy(&mut reader, &mut local)
                .map_err(TransferError::from)
                .and_then(|_| compare(&key, local, &meta));
            session.advance(SessionState::Finalizing);
            settle(verdict, reader.finish())?;
            return Ok(UploadOutcome::AlreadyPresent { key });
        }

        session.advance(SessionState::Transferring);
        let mut counted = ProgressReader::new(&mut reader, on_progress);
        let stored = self
            .resolver
            .store()
            .put(&key, &mut counted)
            .map_err(TransferError::from);
        session.set_transferred(counted.transferred());

        session.advance(SessionState::Finalizing);
        let bytes = settle(stored, reader.finish())?;

        if self.delete_other_variants {
            self.remove_stale_variants(&oid, &key);
        }
        Ok(UploadOutcome::Uploaded { key, bytes })
    }

    fn run_download(
        &self,
        session: &mut Session,
        dest_path: &Path,
        on_progress: &mut dyn FnMut(u64),
    ) -> Result<DownloadOutcome, TransferError> {
        let oid = session.oid().to_string();
        validate_oid(&oid)?;

        session.advance(SessionState::ResolvingVariant);
        let Some((variant, meta)) = self.resolver.resolve(&oid)? else {
            return Err(TransferError::NotFound { oid });
        };
        session.set_variant(variant.name());
        let key = self.resolver.key(&oid, variant.as_ref());
        debug!(oid = %oid, key = %key, expected = ?meta.content_length, "variant resolved");

        let file = File::create(dest_path).map_err(|source| TransferError::LocalFile {
            path: dest_path.to_path_buf(),
            source,
        })?;
        let mut writer = variant.wrap_write(Box::new(BufWriter::new(file)))?;

        session.advance(SessionState::Transferring);
        let mut counted = ProgressWriter::new(&mut writer, on_progress);
        let fetched = self
            .resolver
            .store()
            .get(&key, &mut counted)
            .map_err(TransferError::from);
        session.set_transferred(counted.transferred());

        session.advance(SessionState::Finalizing);
        let bytes = settle(fetched, writer.finish())?;
        Ok(DownloadOutcome {
            key,
            variant: variant.name(),
            bytes,
        })
    }

    /// Best-effort removal of `oid` under every key but `kept`.
    fn remove_stale_variants(&self, oid: &str, kept: &str) {
        for variant in self.resolver.catalog().iter() {
            let key = self.resolver.key(oid, variant.as_ref());
            if key == kept {
                continue;
            }
            match self.resolver.probe(oid, variant.as_ref(), false) {
                Ok(Some(_)) => match self.resolver.store().delete(&key) {
                    Ok(()) => info!(oid, key = %key, "removed stale variant"),
                    Err(e) => warn!(oid, key = %key, error = %e, "failed to remove stale variant"),
                },
                Ok(None) => {}
                Err(e) => warn!(oid, key = %key, error = %e, "failed to probe stale variant"),
            }
        }
    }
}

/// Checks freshly encoded local content against an existing remote object.
///
/// A missing remote checksum falls back to the size check alone.
fn compare(
    key: &str,
    local: ChecksumAccumulator,
    remote: &ObjectMetadata,
) -> Result<(), TransferError> {
    let (len, checksum) = local.finish();
    match remote.content_length {
        Some(remote_len) if remote_len != len => {
            return Err(TransferError::Conflict {
                key: key.to_string(),
                kind: ConflictKind::Size {
                    local: len,
                    remote: remote_len,
                },
            });
        }
        _ => {}
    }
    match remote.checksum.as_deref() {
        Some(remote_sum) if remote_sum != checksum => Err(TransferError::Conflict {
            key: key.to_string(),
            kind: ConflictKind::Checksum {
                local: checksum,
                remote: remote_sum.to_string(),
            },
        }),
        _ => Ok(()),
    }
}

/// Combines a transfer result with its transform's `finish()`.
///
/// A store request failure is kept as is: cutting the stream short makes
/// the decoder fail too, and that second error says nothing new. Any other
/// outcome yields to a transform failure, since a broken codec shows up on
/// the store side only as an I/O error on the pipe.
fn settle<T>(
    result: Result<T, TransferError>,
    finished: Result<(), CompressionError>,
) -> Result<T, TransferError> {
    match (result, finished) {
        (Err(TransferError::Store(e)), Err(codec)) if !matches!(e, StoreError::Io(_)) => {
            debug!(error = %codec, "transform stopped after store failure");
            Err(TransferError::Store(e))
        }
        (_, Err(e)) => Err(e.into()),
        (result, Ok(())) => result,
    }
}
