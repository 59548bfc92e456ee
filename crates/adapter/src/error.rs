use lfs_s3_protocol::ProtocolError;
use lfs_s3_remote::StoreError;
use lfs_s3_transfer::TransferError;

/// Errors produced by the adapter crate.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("logging setup failed: {0}")]
    Logging(String),
}

impl AdapterError {
    /// Numeric code reported to git-lfs.
    pub fn code(&self) -> i32 {
        match self {
            Self::Transfer(e) => i32::from(e.code()),
            Self::Store(StoreError::NotFound(_)) => 404,
            Self::Store(StoreError::Config(_)) => 400,
            Self::Store(_) => 502,
            Self::Config(_) | Self::Protocol(_) | Self::Json(_) => 400,
            Self::Io(_) | Self::Logging(_) => 500,
        }
    }
}
