use std::fmt;
use std::io::{self, Read, Write};

use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use crate::pipe::{TransformReader, TransformWriter, spawn_reader, spawn_writer};
use crate::CompressionError;

/// zstd level used for uploads; trades CPU for the smallest objects.
const ZSTD_LEVEL: i32 = 11;

/// A named compression scheme.
///
/// `wrap_read` turns a local source into the encoded stream that goes to
/// the remote store; `wrap_write` turns a local destination into a sink
/// that accepts the encoded stream and stores the decoded bytes.
pub trait Variant: Send + Sync + fmt::Debug {
    /// Unique name within a catalog (`"zstd"`, `"gzip"`, `"none"`).
    fn name(&self) -> &'static str;

    /// Suffix appended to the object id to form the remote key.
    fn extension(&self) -> &'static str;

    /// Wraps `source` with the compressing transform.
    fn wrap_read(&self, source: Box<dyn Read + Send>) -> Result<TransformReader, CompressionError>;

    /// Wraps `dest` with the decompressing transform.
    fn wrap_write(&self, dest: Box<dyn Write + Send>) -> Result<TransformWriter, CompressionError>;
}

// ---------------------------------------------------------------------------
// none
// ---------------------------------------------------------------------------

/// Stores objects as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl Variant for NoCompression {
    fn name(&self) -> &'static str {
        "none"
    }

    fn extension(&self) -> &'static str {
        ""
    }

    fn wrap_read(&self, source: Box<dyn Read + Send>) -> Result<TransformReader, CompressionError> {
        Ok(TransformReader::passthrough(self.name(), source))
    }

    fn wrap_write(&self, dest: Box<dyn Write + Send>) -> Result<TransformWriter, CompressionError> {
        Ok(TransformWriter::passthrough(self.name(), dest))
    }
}

// ---------------------------------------------------------------------------
// gzip
// ---------------------------------------------------------------------------

/// gzip at best compression.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gzip;

impl Variant for Gzip {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn extension(&self) -> &'static str {
        ".gz"
    }

    fn wrap_read(&self, source: Box<dyn Read + Send>) -> Result<TransformReader, CompressionError> {
        spawn_reader(self.name(), source, |mut source, out| {
            let mut encoder = GzEncoder::new(out, Compression::best());
            io::copy(&mut source, &mut encoder)?;
            encoder.finish()?;
            Ok(())
        })
    }

    fn wrap_write(&self, dest: Box<dyn Write + Send>) -> Result<TransformWriter, CompressionError> {
        spawn_writer(self.name(), dest, |input, mut dest| {
            let mut decoder = MultiGzDecoder::new(input);
            io::copy(&mut decoder, &mut dest)?;
            dest.flush()
        })
    }
}

// ---------------------------------------------------------------------------
// zstd
// ---------------------------------------------------------------------------

/// zstd with frame checksums enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Zstd;

impl Variant for Zstd {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn extension(&self) -> &'static str {
        ".zstd"
    }

    fn wrap_read(&self, source: Box<dyn Read + Send>) -> Result<TransformReader, CompressionError> {
        spawn_reader(self.name(), source, |mut source, out| {
            let mut encoder = zstd::stream::write::Encoder::new(out, ZSTD_LEVEL)?;
            encoder.include_checksum(true)?;
            io::copy(&mut source, &mut encoder)?;
            encoder.finish()?;
            Ok(())
        })
    }

    fn wrap_write(&self, dest: Box<dyn Write + Send>) -> Result<TransformWriter, CompressionError> {
        spawn_writer(self.name(), dest, |input, mut dest| {
            let mut decoder = zstd::stream::read::Decoder::new(input)?;
            io::copy(&mut decoder, &mut dest)?;
            dest.flush()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn encode(variant: &dyn Variant, data: &[u8]) -> Vec<u8> {
        let mut reader = variant.wrap_read(Box::new(Cursor::new(data.to_vec()))).unwrap();
        let mut encoded = Vec::new();
        reader.read_to_end(&mut encoded).unwrap();
        reader.finish().unwrap();
        encoded
    }

    fn decode(variant: &dyn Variant, encoded: &[u8]) -> Result<Vec<u8>, CompressionError> {
        let sink = SharedSink::default();
        let mut writer = variant.wrap_write(Box::new(sink.clone()))?;
        // A failing worker may surface on write or on finish.
        let written = writer.write_all(encoded);
        let finished = writer.finish();
        finished?;
        written.map_err(|source| CompressionError::Transform {
            variant: variant.name(),
            source,
        })?;
        let out = sink.0.lock().unwrap().clone();
        Ok(out)
    }

    fn sample() -> Vec<u8> {
        b"the same line over and over again\n".repeat(10_000)
    }

    #[test]
    fn names_and_extensions() {
        assert_eq!((Zstd.name(), Zstd.extension()), ("zstd", ".zstd"));
        assert_eq!((Gzip.name(), Gzip.extension()), ("gzip", ".gz"));
        assert_eq!((NoCompression.name(), NoCompression.extension()), ("none", ""));
    }

    #[test]
    fn zstd_roundtrip_shrinks_repetitive_data() {
        let data = sample();
        let encoded = encode(&Zstd, &data);
        assert!(encoded.len() < data.len() / 10);
        assert_eq!(decode(&Zstd, &encoded).unwrap(), data);
    }

    #[test]
    fn gzip_roundtrip_shrinks_repetitive_data() {
        let data = sample();
        let encoded = encode(&Gzip, &data);
        assert_eq!(&encoded[..2], &[0x1f, 0x8b]);
        assert!(encoded.len() < data.len() / 10);
        assert_eq!(decode(&Gzip, &encoded).unwrap(), data);
    }

    #[test]
    fn none_is_identity() {
        let data = sample();
        assert_eq!(encode(&NoCompression, &data), data);
        assert_eq!(decode(&NoCompression, &data).unwrap(), data);
    }

    #[test]
    fn empty_input_produces_valid_stream() {
        for variant in [&Zstd as &dyn Variant, &Gzip, &NoCompression] {
            let encoded = encode(variant, b"");
            if variant.name() != "none" {
                assert!(!encoded.is_empty(), "{} emits a header", variant.name());
            }
            assert!(decode(variant, &encoded).unwrap().is_empty());
        }
    }

    #[test]
    fn corrupted_zstd_stream_is_a_transform_error() {
        let mut encoded = encode(&Zstd, &sample());
        let mid = encoded.len() / 2;
        encoded[mid] ^= 0xff;
        encoded[mid + 1] ^= 0xff;
        assert!(matches!(
            decode(&Zstd, &encoded),
            Err(CompressionError::Transform { variant: "zstd", .. })
        ));
    }

    #[test]
    fn garbage_is_not_gzip() {
        let err = decode(&Gzip, b"definitely not a gzip stream").unwrap_err();
        assert!(matches!(err, CompressionError::Transform { variant: "gzip", .. }));
    }
}
