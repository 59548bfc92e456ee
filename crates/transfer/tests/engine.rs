use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lfs_s3_compression::{Catalog, CompressionError};
use lfs_s3_remote::{MemoryStore, StoreError};
use lfs_s3_transfer::{ConflictKind, Engine, EngineConfig, TransferError, UploadOutcome};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

const ROOT: &str = "lfs/objects";

fn oid_of(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn engine(store: &Arc<MemoryStore>, variant: &str, cleanup: bool) -> Engine {
    Engine::new(
        store.clone(),
        Arc::new(Catalog::standard()),
        EngineConfig {
            root_path: ROOT.into(),
            upload_variant: Some(variant.into()),
            delete_other_variants: cleanup,
        },
    )
    .unwrap()
}

fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, data).unwrap();
    path
}

/// Mixed content: long runs that compress well and a noisy tail that does not.
fn sample(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    (0..len)
        .map(|i| {
            if i % 4096 < 2048 {
                b"git-lfs object payload "[i % 23]
            } else {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            }
        })
        .collect()
}

fn upload(engine: &Engine, oid: &str, path: &Path) -> (Result<UploadOutcome, TransferError>, Vec<u64>) {
    let mut deltas = Vec::new();
    let result = engine.upload(oid, path, &mut |n| deltas.push(n));
    (result, deltas)
}

#[test]
fn second_upload_of_same_content_sends_nothing() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, "zstd", false);
    let data = sample(200_000);
    let oid = oid_of(&data);
    let path = write_file(&dir, "obj", &data);

    let (first, deltas) = upload(&engine, &oid, &path);
    let key = format!("{ROOT}/{oid}.zstd");
    assert!(matches!(first.unwrap(), UploadOutcome::Uploaded { key: k, .. } if k == key));
    assert!(!deltas.is_empty());

    let (second, deltas) = upload(&engine, &oid, &path);
    assert_eq!(second.unwrap(), UploadOutcome::AlreadyPresent { key: key.clone() });
    assert!(deltas.is_empty());
    assert_eq!(store.put_count(), 1);
    assert_eq!(store.keys(), vec![key]);
}

#[test]
fn different_content_at_same_oid_is_a_conflict() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, "none", false);
    let oid = oid_of(b"original");
    let key = format!("{ROOT}/{oid}");

    let original = write_file(&dir, "a", b"original");
    engine.upload(&oid, &original, &mut |_| {}).unwrap();

    // Same length, different bytes: only the checksum can tell.
    let forged = write_file(&dir, "b", b"origin4l");
    let err = engine.upload(&oid, &forged, &mut |_| {}).unwrap_err();
    assert!(matches!(
        &err,
        TransferError::Conflict { key: k, kind: ConflictKind::Checksum { .. } } if *k == key
    ));
    assert_eq!(err.code(), 409);

    let longer = write_file(&dir, "c", b"original, but longer");
    let err = engine.upload(&oid, &longer, &mut |_| {}).unwrap_err();
    assert!(matches!(
        err,
        TransferError::Conflict {
            kind: ConflictKind::Size { local: 20, remote: 8 },
            ..
        }
    ));

    assert_eq!(store.object(&key).unwrap(), b"original");
    assert_eq!(store.put_count(), 1);
}

#[test]
fn every_variant_round_trips() {
    let data = sample(300_000);
    let oid = oid_of(&data);

    for (name, extension) in [("zstd", ".zstd"), ("gzip", ".gz"), ("none", "")] {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new().with_part_size(64 * 1024));
        let engine = engine(&store, name, false);
        let src = write_file(&dir, "src", &data);
        let dest = dir.path().join("dest");

        engine.upload(&oid, &src, &mut |_| {}).unwrap();
        let outcome = engine.download(&oid, &dest, &mut |_| {}).unwrap();

        assert_eq!(outcome.variant, name);
        assert_eq!(outcome.key, format!("{ROOT}/{oid}{extension}"));
        assert_eq!(fs::read(&dest).unwrap(), data, "{name} round trip");
    }
}

#[test]
fn empty_file_round_trips() {
    let oid = oid_of(b"");
    for name in ["zstd", "gzip", "none"] {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let engine = engine(&store, name, false);
        let src = write_file(&dir, "empty", b"");
        let dest = dir.path().join("dest");

        let (result, _) = upload(&engine, &oid, &src);
        result.unwrap();
        engine.download(&oid, &dest, &mut |_| {}).unwrap();
        assert!(fs::read(&dest).unwrap().is_empty(), "{name}");
    }
}

#[test]
fn download_prefers_zstd_over_gzip() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let data = sample(50_000);
    let oid = oid_of(&data);
    let src = write_file(&dir, "src", &data);

    engine(&store, "gzip", false).upload(&oid, &src, &mut |_| {}).unwrap();
    engine(&store, "zstd", false).upload(&oid, &src, &mut |_| {}).unwrap();
    assert_eq!(store.keys().len(), 2);

    let dest = dir.path().join("dest");
    let outcome = engine(&store, "none", false)
        .download(&oid, &dest, &mut |_| {})
        .unwrap();
    assert_eq!(outcome.variant, "zstd");
    assert_eq!(fs::read(&dest).unwrap(), data);
}

#[test]
fn progress_sums_to_encoded_size() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new().with_part_size(32 * 1024));
    let engine = engine(&store, "gzip", false);
    let data = sample(500_000);
    let oid = oid_of(&data);
    let src = write_file(&dir, "src", &data);

    let (result, deltas) = upload(&engine, &oid, &src);
    let UploadOutcome::Uploaded { key, bytes } = result.unwrap() else {
        panic!("expected a new upload");
    };
    let stored = store.object(&key).unwrap().len() as u64;
    assert_eq!(bytes, stored);
    assert!(deltas.iter().all(|&n| n > 0));
    assert!(deltas.len() > 1);
    assert_eq!(deltas.iter().sum::<u64>(), stored);

    let mut seen = Vec::new();
    let dest = dir.path().join("dest");
    let outcome = engine.download(&oid, &dest, &mut |n| seen.push(n)).unwrap();
    assert_eq!(outcome.bytes, stored);
    assert!(seen.iter().all(|&n| n > 0));
    let mut total = 0u64;
    for n in &seen {
        let next = total + n;
        assert!(next >= total);
        total = next;
    }
    assert_eq!(total, stored);
}

#[test]
fn missing_object_is_not_found_and_leaves_no_file() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, "zstd", false);
    let oid = oid_of(b"never uploaded");
    let dest = dir.path().join("dest");

    let err = engine.download(&oid, &dest, &mut |_| {}).unwrap_err();
    assert!(matches!(&err, TransferError::NotFound { oid: o } if *o == oid));
    assert_eq!(err.code(), 404);
    assert!(!dest.exists());
}

#[test]
fn cleanup_removes_other_variants() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let data = sample(20_000);
    let oid = oid_of(&data);
    let src = write_file(&dir, "src", &data);

    engine(&store, "none", false).upload(&oid, &src, &mut |_| {}).unwrap();
    engine(&store, "gzip", true).upload(&oid, &src, &mut |_| {}).unwrap();

    assert_eq!(store.keys(), vec![format!("{ROOT}/{oid}.gz")]);
    assert_eq!(store.delete_count(), 1);
}

#[test]
fn cleanup_failures_do_not_fail_the_upload() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let data = sample(20_000);
    let oid = oid_of(&data);
    let src = write_file(&dir, "src", &data);

    engine(&store, "none", false).upload(&oid, &src, &mut |_| {}).unwrap();
    store.set_fail_deletes(true);
    let outcome = engine(&store, "zstd", true).upload(&oid, &src, &mut |_| {});

    assert!(matches!(outcome, Ok(UploadOutcome::Uploaded { .. })));
    assert_eq!(store.keys().len(), 2);
}

#[test]
fn cleanup_is_skipped_when_object_already_present() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let data = sample(20_000);
    let oid = oid_of(&data);
    let src = write_file(&dir, "src", &data);

    engine(&store, "zstd", false).upload(&oid, &src, &mut |_| {}).unwrap();
    engine(&store, "none", false).upload(&oid, &src, &mut |_| {}).unwrap();
    let outcome = engine(&store, "zstd", true).upload(&oid, &src, &mut |_| {}).unwrap();

    assert!(matches!(outcome, UploadOutcome::AlreadyPresent { .. }));
    assert_eq!(store.keys().len(), 2);
    assert_eq!(store.delete_count(), 0);
}

#[test]
fn corrupted_remote_object_is_a_codec_error() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, "zstd", false);
    let oid = oid_of(b"payload");
    store.insert(format!("{ROOT}/{oid}.zstd"), b"this is not a zstd frame".to_vec());

    let err = engine
        .download(&oid, &dir.path().join("dest"), &mut |_| {})
        .unwrap_err();
    assert!(matches!(
        err,
        TransferError::Codec(CompressionError::Transform { variant: "zstd", .. })
    ));
    assert_eq!(err.code(), 500);
}

#[test]
fn size_only_check_without_remote_checksum() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new().without_checksums());
    let engine = engine(&store, "none", false);
    let oid = oid_of(b"abcdef");
    let key = format!("{ROOT}/{oid}");

    let src = write_file(&dir, "src", b"abcdef");
    engine.upload(&oid, &src, &mut |_| {}).unwrap();
    let (again, deltas) = upload(&engine, &oid, &src);
    assert_eq!(again.unwrap(), UploadOutcome::AlreadyPresent { key: key.clone() });
    assert!(deltas.is_empty());

    // Without a checksum, equal sizes are all that can be compared.
    let same_size = write_file(&dir, "other", b"ABCDEF");
    assert!(engine.upload(&oid, &same_size, &mut |_| {}).is_ok());

    let other_size = write_file(&dir, "short", b"abc");
    assert!(matches!(
        engine.upload(&oid, &other_size, &mut |_| {}),
        Err(TransferError::Conflict { kind: ConflictKind::Size { .. }, .. })
    ));
    assert_eq!(store.object(&key).unwrap(), b"abcdef");
}

#[test]
fn invalid_oid_is_rejected_before_any_store_call() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, "zstd", false);
    let src = write_file(&dir, "src", b"data");

    for oid in ["", "../escape", "a/b", "with space"] {
        let err = engine.upload(oid, &src, &mut |_| {}).unwrap_err();
        assert!(matches!(err, TransferError::InvalidOid(_)), "{oid:?}");
        assert_eq!(err.code(), 400);

        let dest = dir.path().join("dest");
        let err = engine.download(oid, &dest, &mut |_| {}).unwrap_err();
        assert!(matches!(err, TransferError::InvalidOid(_)));
        assert!(!dest.exists());
    }
    assert!(store.keys().is_empty());
    assert_eq!(store.put_count(), 0);
}

#[test]
fn missing_local_file_is_an_input_error() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = engine(&store, "zstd", false);
    let missing = dir.path().join("nope");

    let err = engine
        .upload(&oid_of(b"x"), &missing, &mut |_| {})
        .unwrap_err();
    assert!(matches!(&err, TransferError::LocalFile { path, .. } if *path == missing));
    assert_eq!(err.code(), 400);
    assert!(store.keys().is_empty());
}

#[test]
fn empty_root_path_uses_bare_keys() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(
        store.clone(),
        Arc::new(Catalog::standard()),
        EngineConfig::default(),
    )
    .unwrap();
    let oid = oid_of(b"bare");
    let src = write_file(&dir, "src", b"bare");

    let outcome = engine.upload(&oid, &src, &mut |_| {}).unwrap();
    assert_eq!(outcome.key(), format!("{oid}.zstd"));
    assert_eq!(engine.upload_variant().name(), "zstd");
}

#[test]
fn store_failure_mid_download_is_a_store_error_for_every_variant() {
    let dir = TempDir::new().unwrap();
    let data = sample(300_000);
    let oid = oid_of(&data);
    let path = write_file(&dir, "obj", &data);

    for variant in ["zstd", "gzip", "none"] {
        let store = Arc::new(MemoryStore::new().with_part_size(16 * 1024));
        let engine = engine(&store, variant, false);
        let outcome = engine.upload(&oid, &path, &mut |_| {}).unwrap();
        let stored = store.object(outcome.key()).unwrap().len() as u64;
        store.set_fail_gets_after(Some(stored / 2));

        let dest = dir.path().join(format!("out-{variant}"));
        let err = engine.download(&oid, &dest, &mut |_| {}).unwrap_err();
        assert!(
            matches!(err, TransferError::Store(StoreError::Request { op: "get", .. })),
            "{variant}: {err}"
        );
        assert_eq!(err.code(), 502, "{variant}");
    }
}

#[test]
fn store_failure_mid_upload_leaves_no_object() {
    let dir = TempDir::new().unwrap();
    let data = sample(300_000);
    let oid = oid_of(&data);
    let path = write_file(&dir, "obj", &data);

    for variant in ["zstd", "gzip", "none"] {
        let store = Arc::new(MemoryStore::new().with_part_size(16 * 1024));
        store.set_fail_puts_after(Some(20_000));
        let engine = engine(&store, variant, true);

        let err = engine.upload(&oid, &path, &mut |_| {}).unwrap_err();
        assert!(
            matches!(err, TransferError::Store(StoreError::Request { op: "put", .. })),
            "{variant}: {err}"
        );
        assert_eq!(err.code(), 502, "{variant}");
        assert!(store.keys().is_empty(), "{variant}");

        store.set_fail_puts_after(None);
        let outcome = engine.upload(&oid, &path, &mut |_| {}).unwrap();
        assert!(matches!(outcome, UploadOutcome::Uploaded { .. }), "{variant}");
        assert_eq!(store.keys().len(), 1, "{variant}");
    }
}
