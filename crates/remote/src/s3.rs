//! S3-compatible object store built on the AWS SDK.
//!
//! The SDK is async; [`S3Store`] owns a small tokio runtime and blocks on
//! it so the transfer engine can stay synchronous. Do not call it from
//! inside another runtime.

use std::collections::VecDeque;
use std::fmt;
use std::io::{Read, Write};

use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    ChecksumAlgorithm, ChecksumMode, ChecksumType, CompletedMultipartUpload, CompletedPart,
};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::checksum::{ChecksumAccumulator, checksum_bytes, is_full_object};
use crate::unsigned::{GCS_UNSIGNED, UnsignedHeaders, is_gcs_endpoint};
use crate::{MAX_PARTS, ObjectMetadata, ObjectStore, PART_SIZE, StoreError, read_part};

/// A part upload or ranged read running on the store's runtime.
type PartTask<T> = JoinHandle<Result<T, StoreError>>;

/// Connection settings for [`S3Store`].
#[derive(Clone)]
pub struct S3Config {
    pub bucket: String,
    /// Custom endpoint for S3-compatible services (MinIO, R2, ...).
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub force_path_style: bool,
    /// Bytes per multipart part and per ranged GET.
    pub part_size: usize,
    /// Parts kept in flight at once.
    pub concurrency: usize,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            endpoint: None,
            region: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
            part_size: PART_SIZE,
            concurrency: 1,
        }
    }
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("bucket", &self.bucket)
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("force_path_style", &self.force_path_style)
            .field("part_size", &self.part_size)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

/// Blocking [`ObjectStore`] over an S3 bucket.
pub struct S3Store {
    runtime: Runtime,
    client: Client,
    bucket: String,
    part_size: usize,
    concurrency: usize,
}

impl fmt::Debug for S3Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Store")
            .field("bucket", &self.bucket)
            .field("part_size", &self.part_size)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl S3Store {
    /// Builds the SDK client from the ambient AWS configuration, overlaid
    /// with whatever `config` sets explicitly.
    pub fn connect(config: S3Config) -> Result<Self, StoreError> {
        if config.bucket.is_empty() {
            return Err(StoreError::Config("bucket is required".into()));
        }
        if config.part_size == 0 || config.concurrency == 0 {
            return Err(StoreError::Config(
                "part size and concurrency must be positive".into(),
            ));
        }

        if config.access_key_id.is_some() != config.secret_access_key.is_some() {
            return Err(StoreError::Config(
                "access key id and secret access key must be set together".into(),
            ));
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.concurrency.clamp(1, 8))
            .thread_name("lfs-s3-io")
            .enable_all()
            .build()?;

        let sdk = runtime.block_on(aws_config::defaults(BehaviorVersion::latest()).load());
        let mut builder = aws_sdk_s3::config::Builder::from(&sdk);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
            if is_gcs_endpoint(endpoint) {
                debug!(endpoint = %endpoint, "leaving Accept-Encoding unsigned for GCS");
                builder = builder.interceptor(UnsignedHeaders::new(GCS_UNSIGNED));
            }
        }
        if let Some(region) = &config.region {
            builder = builder.region(Region::new(region.clone()));
        }
        if let (Some(key), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            builder =
                builder.credentials_provider(Credentials::new(key, secret, None, None, "lfs-s3"));
        }
        let client = Client::from_conf(builder.force_path_style(config.force_path_style).build());

        info!(
            bucket = %config.bucket,
            endpoint = config.endpoint.as_deref().unwrap_or("default"),
            part_size = config.part_size,
            concurrency = config.concurrency,
            "S3 store ready"
        );

        Ok(Self {
            runtime,
            client,
            bucket: config.bucket,
            part_size: config.part_size,
            concurrency: config.concurrency,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn put_single(&self, key: &str, data: Vec<u8>) -> Result<u64, StoreError> {
        let len = data.len() as u64;
        let checksum = checksum_bytes(&data);
        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .checksum_crc32(checksum)
                    .body(ByteStream::from(data))
                    .send(),
            )
            .map_err(|e| request_error("put", key, e))?;
        debug!(key, len, "single put complete");
        Ok(len)
    }

    fn put_multipart(
        &self,
        key: &str,
        first: Vec<u8>,
        body: &mut dyn Read,
    ) -> Result<u64, StoreError> {
        let created = self
            .runtime
            .block_on(
                self.client
                    .create_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .checksum_algorithm(ChecksumAlgorithm::Crc32)
                    .checksum_type(ChecksumType::FullObject)
                    .send(),
            )
            .map_err(|e| request_error("create multipart upload", key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StoreError::Request {
                op: "create multipart upload",
                key: key.to_string(),
                message: "response carried no upload id".into(),
            })?
            .to_string();
        debug!(key, upload_id = %upload_id, "multipart upload started");

        let mut in_flight = VecDeque::new();
        match self.upload_parts(key, &upload_id, first, body, &mut in_flight) {
            Ok(len) => Ok(len),
            Err(e) => {
                // Parts still uploading would land after the abort and linger.
                let drained = drain(&self.runtime, in_flight);
                debug!(key, drained, "in-flight parts settled before abort");
                let aborted = self.runtime.block_on(
                    self.client
                        .abort_multipart_upload()
                        .bucket(&self.bucket)
                        .key(key)
                        .upload_id(&upload_id)
                        .send(),
                );
                if let Err(abort) = aborted {
                    warn!(key, error = %DisplayErrorContext(&abort), "failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        first: Vec<u8>,
        body: &mut dyn Read,
        in_flight: &mut VecDeque<PartTask<CompletedPart>>,
    ) -> Result<u64, StoreError> {
        let mut whole = ChecksumAccumulator::new();
        let mut parts = Vec::new();
        let mut next = Some(first);
        let mut number = 0usize;

        while let Some(data) = next.take() {
            number += 1;
            if number > MAX_PARTS {
                return Err(StoreError::TooLarge(format!(
                    "{key} needs more than {MAX_PARTS} parts of {} bytes",
                    self.part_size
                )));
            }
            whole.update(&data);
            in_flight.push_back(self.spawn_part(key, upload_id, number, data));
            if in_flight.len() >= self.concurrency {
                parts.push(self.join_part(key, in_flight.pop_front())?);
            }

            let data = read_part(body, self.part_size)?;
            if !data.is_empty() {
                next = Some(data);
            }
        }
        while !in_flight.is_empty() {
            parts.push(self.join_part(key, in_flight.pop_front())?);
        }

        let (len, checksum) = whole.finish();
        self.runtime
            .block_on(
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .checksum_crc32(checksum)
                    .checksum_type(ChecksumType::FullObject)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send(),
            )
            .map_err(|e| request_error("complete multipart upload", key, e))?;
        debug!(key, len, parts = number, "multipart upload complete");
        Ok(len)
    }

    fn spawn_part(
        &self,
        key: &str,
        upload_id: &str,
        number: usize,
        data: Vec<u8>,
    ) -> PartTask<CompletedPart> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = key.to_string();
        let upload_id = upload_id.to_string();
        // Bounded by MAX_PARTS.
        let part_number = number as i32;

        self.runtime.spawn(async move {
            let checksum = checksum_bytes(&data);
            let out = client
                .upload_part()
                .bucket(bucket)
                .key(&key)
                .upload_id(upload_id)
                .part_number(part_number)
                .checksum_crc32(checksum.clone())
                .body(ByteStream::from(data))
                .send()
                .await
                .map_err(|e| request_error("upload part", &key, e))?;
            Ok(CompletedPart::builder()
                .part_number(part_number)
                .set_e_tag(out.e_tag().map(str::to_string))
                .checksum_crc32(checksum)
                .build())
        })
    }

    fn join_part<T>(&self, key: &str, handle: Option<PartTask<T>>) -> Result<T, StoreError> {
        let Some(handle) = handle else {
            return Err(StoreError::Request {
                op: "transfer part",
                key: key.to_string(),
                message: "no part in flight".into(),
            });
        };
        self.runtime
            .block_on(handle)
            .map_err(|e| StoreError::Request {
                op: "transfer part",
                key: key.to_string(),
                message: e.to_string(),
            })?
    }

    /// Writes `len` bytes of `key` into `sink` using ranged reads, up to
    /// `concurrency` at a time. Reads left in `in_flight` on error are the
    /// caller's to cancel.
    fn fetch_ranges(
        &self,
        key: &str,
        len: u64,
        sink: &mut dyn Write,
        in_flight: &mut VecDeque<PartTask<Vec<u8>>>,
    ) -> Result<u64, StoreError> {
        let part = self.part_size as u64;
        let mut start = 0u64;
        let mut written = 0u64;

        while start < len || !in_flight.is_empty() {
            while start < len && in_flight.len() < self.concurrency {
                let end = (start + part).min(len) - 1;
                in_flight.push_back(self.spawn_range(key, start, end));
                start = end + 1;
            }
            let data = self.join_part(key, in_flight.pop_front())?;
            sink.write_all(&data)?;
            written += data.len() as u64;
        }
        Ok(written)
    }

    fn spawn_range(&self, key: &str, start: u64, end: u64) -> PartTask<Vec<u8>> {
        let client = self.client.clone();
        let bucket = self.bucket.clone();
        let key = key.to_string();

        self.runtime.spawn(async move {
            let out = client
                .get_object()
                .bucket(bucket)
                .key(&key)
                .range(format!("bytes={start}-{end}"))
                .send()
                .await
                .map_err(|e| {
                    if e.as_service_error().is_some_and(|s| s.is_no_such_key()) {
                        StoreError::NotFound(key.clone())
                    } else {
                        request_error("get", &key, e)
                    }
                })?;
            let bytes = out.body.collect().await.map_err(|e| StoreError::Request {
                op: "get",
                key: key.clone(),
                message: e.to_string(),
            })?;
            Ok(bytes.into_bytes().to_vec())
        })
    }
}

impl ObjectStore for S3Store {
    fn head(&self, key: &str, with_checksum: bool) -> Result<Option<ObjectMetadata>, StoreError> {
        let mut request = self.client.head_object().bucket(&self.bucket).key(key);
        if with_checksum {
            request = request.checksum_mode(ChecksumMode::Enabled);
        }

        match self.runtime.block_on(request.send()) {
            Ok(out) => Ok(Some(ObjectMetadata {
                content_length: out.content_length().and_then(|n| u64::try_from(n).ok()),
                checksum: out
                    .checksum_crc32()
                    .filter(|c| is_full_object(c))
                    .map(str::to_string),
            })),
            Err(e) => {
                let missing = e.as_service_error().is_some_and(|s| s.is_not_found())
                    || e.raw_response().is_some_and(|r| r.status().as_u16() == 404);
                if missing {
                    Ok(None)
                } else {
                    Err(request_error("head", key, e))
                }
            }
        }
    }

    fn put(&self, key: &str, body: &mut dyn Read) -> Result<u64, StoreError> {
        let first = read_part(body, self.part_size)?;
        if first.len() < self.part_size {
            self.put_single(key, first)
        } else {
            self.put_multipart(key, first, body)
        }
    }

    fn get(&self, key: &str, sink: &mut dyn Write) -> Result<u64, StoreError> {
        let len = self
            .head(key, false)?
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?
            .content_length
            .ok_or_else(|| StoreError::Request {
                op: "get",
                key: key.to_string(),
                message: "object has no content length".into(),
            })?;

        let mut in_flight = VecDeque::new();
        let fetched = self.fetch_ranges(key, len, sink, &mut in_flight);
        for task in &in_flight {
            task.abort();
        }
        let written = fetched?;
        sink.flush()?;

        if written != len {
            return Err(StoreError::Request {
                op: "get",
                key: key.to_string(),
                message: format!("expected {len} bytes, received {written}"),
            });
        }
        debug!(key, len, "ranged get complete");
        Ok(written)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.runtime
            .block_on(
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(key)
                    .send(),
            )
            .map_err(|e| request_error("delete", key, e))?;
        debug!(key, "object deleted");
        Ok(())
    }
}

/// Waits for every task in `in_flight` to end, ignoring outcomes.
///
/// Returns how many tasks were waited on.
fn drain<T>(runtime: &Runtime, in_flight: VecDeque<PartTask<T>>) -> usize {
    let count = in_flight.len();
    for task in in_flight {
        if let Ok(Err(e)) = runtime.block_on(task) {
            debug!(error = %e, "part failed while draining");
        }
    }
    count
}

fn request_error<E: std::error::Error>(op: &'static str, key: &str, err: E) -> StoreError {
    StoreError::Request {
        op,
        key: key.to_string(),
        message: DisplayErrorContext(err).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_rejects_missing_bucket() {
        let err = S3Store::connect(S3Config::default()).unwrap_err();
        assert!(matches!(err, StoreError::Config(_)));
    }

    #[test]
    fn connect_rejects_zero_part_size() {
        let config = S3Config {
            bucket: "b".into(),
            part_size: 0,
            ..S3Config::default()
        };
        assert!(matches!(
            S3Store::connect(config),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn connect_rejects_half_credentials() {
        let config = S3Config {
            bucket: "b".into(),
            region: Some("us-east-1".into()),
            access_key_id: Some("AKIA".into()),
            ..S3Config::default()
        };
        assert!(matches!(
            S3Store::connect(config),
            Err(StoreError::Config(_))
        ));
    }

    #[test]
    fn drain_waits_for_every_task() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let finished = Arc::new(AtomicUsize::new(0));
        let in_flight: VecDeque<PartTask<()>> = (0..4u64)
            .map(|i| {
                let finished = finished.clone();
                runtime.spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20 * (4 - i))).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    if i == 1 {
                        return Err(StoreError::Config("part rejected".into()));
                    }
                    Ok::<(), StoreError>(())
                })
            })
            .collect();

        assert_eq!(drain(&runtime, in_flight), 4);
        assert_eq!(finished.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn debug_hides_secret() {
        let config = S3Config {
            bucket: "b".into(),
            secret_access_key: Some("hunter2".into()),
            ..S3Config::default()
        };
        let shown = format!("{config:?}");
        assert!(!shown.contains("hunter2"));
        assert!(shown.contains("<redacted>"));
    }
}
