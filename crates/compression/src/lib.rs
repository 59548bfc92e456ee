//! Compression variants and the streaming transforms that apply them.
//!
//! A [`Variant`] names a compression scheme and the filename extension
//! used for objects stored with it. Its transforms run the codec on a
//! dedicated worker thread connected to the caller through a bounded pipe,
//! so a slow consumer backpressures the codec instead of buffering the
//! whole stream in memory.

mod catalog;
mod pipe;
mod variant;

pub use catalog::Catalog;
pub use pipe::{TransformReader, TransformWriter};
pub use variant::{Gzip, NoCompression, Variant, Zstd};

/// Maximum size of a single chunk handed across a pipe (64 KiB).
pub const PIPE_CHUNK_SIZE: usize = 64 * 1024;

/// Number of chunks a pipe buffers before the producer blocks.
pub const PIPE_DEPTH: usize = 8;

/// Errors produced by the compression crate.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("{variant} transform failed: {source}")]
    Transform {
        variant: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} transform worker panicked")]
    WorkerPanicked(&'static str),

    #[error("failed to start {variant} transform worker: {source}")]
    Spawn {
        variant: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown compression variant: {0}")]
    UnknownVariant(String),

    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),
}
