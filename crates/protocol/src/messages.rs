use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request kinds sent by git-lfs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Init,
    Upload,
    Download,
    Terminate,
    #[serde(other)]
    Unknown,
}

/// Direction negotiated at `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Upload,
    Download,
    #[serde(other)]
    Unknown,
}

/// Transfer action from the LFS API; standalone agents receive none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub href: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub header: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Any message git-lfs sends to the agent.
///
/// Fields not used by an event are absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub event: Event,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrent: Option<bool>,
    #[serde(
        default,
        rename = "concurrenttransfers",
        skip_serializing_if = "Option::is_none"
    )]
    pub concurrent_transfers: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
}

impl Request {
    /// Creates a request carrying only `event`.
    pub fn new(event: Event) -> Self {
        Self {
            event,
            operation: None,
            concurrent: None,
            concurrent_transfers: None,
            oid: None,
            size: None,
            path: None,
            action: None,
        }
    }

    /// The oid of an upload or download request.
    pub fn require_oid(&self) -> Result<&str, ProtocolError> {
        self.oid.as_deref().ok_or(ProtocolError::MissingField("oid"))
    }

    /// The local path of an upload request.
    pub fn require_path(&self) -> Result<&str, ProtocolError> {
        self.path.as_deref().ok_or(ProtocolError::MissingField("path"))
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Error details attached to a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
}

impl ErrorBody {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Reply to `init`: `{}` on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl InitResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn failed(code: i32, message: impl Into<String>) -> Self {
        Self {
            error: Some(ErrorBody::new(code, message)),
        }
    }
}

/// Bytes moved so far for one oid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessage {
    pub oid: String,
    pub bytes_so_far: u64,
    pub bytes_since_last: u64,
}

/// End of one transfer. `path` is set for successful downloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMessage {
    pub oid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// Event messages the agent sends while serving transfers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum Response {
    Progress(ProgressMessage),
    Complete(CompleteMessage),
}

impl Response {
    pub fn progress(oid: impl Into<String>, bytes_so_far: u64, bytes_since_last: u64) -> Self {
        Self::Progress(ProgressMessage {
            oid: oid.into(),
            bytes_so_far,
            bytes_since_last,
        })
    }

    pub fn completed(oid: impl Into<String>, path: Option<String>) -> Self {
        Self::Complete(CompleteMessage {
            oid: oid.into(),
            path,
            error: None,
        })
    }

    pub fn failed(oid: impl Into<String>, code: i32, message: impl Into<String>) -> Self {
        Self::Complete(CompleteMessage {
            oid: oid.into(),
            path: None,
            error: Some(ErrorBody::new(code, message)),
        })
    }
}
