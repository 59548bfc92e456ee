//! Message types for the git-lfs custom transfer protocol.
//!
//! git-lfs talks to a transfer agent with one JSON object per line:
//! requests arrive on stdin, responses go to stdout.

pub mod line;
pub mod messages;

pub use line::{decode_line, encode_line, write_message};
pub use messages::{
    Action, CompleteMessage, ErrorBody, Event, InitResponse, Operation, ProgressMessage, Request,
    Response,
};

/// Errors produced by the protocol crate.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("request is missing required field: {0}")]
    MissingField(&'static str),
}
