use std::fmt;
use std::path::PathBuf;

use lfs_s3_compression::CompressionError;
use lfs_s3_remote::StoreError;

/// What disagreed between the local content and an existing remote object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    Size { local: u64, remote: u64 },
    Checksum { local: String, remote: String },
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Size { local, remote } => {
                write!(f, "size mismatch (local {local} bytes, remote {remote} bytes)")
            }
            Self::Checksum { local, remote } => {
                write!(f, "checksum mismatch (local {local}, remote {remote})")
            }
        }
    }
}

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("invalid oid: {0}")]
    InvalidOid(String),

    #[error("cannot open {}: {source}", path.display())]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("object {oid} not found under any variant")]
    NotFound { oid: String },

    #[error("remote object {key} differs from local content: {kind}")]
    Conflict { key: String, kind: ConflictKind },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("codec error: {0}")]
    Codec(#[from] CompressionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Numeric code reported to the calling process.
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidOid(_) | Self::LocalFile { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Store(StoreError::NotFound(_)) => 404,
            Self::Store(StoreError::Config(_)) => 400,
            Self::Store(_) => 502,
            Self::Codec(_) | Self::Io(_) => 500,
        }
    }
}
