//! Content-addressed object transfer between local files and a remote store.
//!
//! Objects are stored as `<root>/<oid><extension>`, where the extension
//! names the compression variant. Uploads are idempotent: an object that
//! already matches is verified locally and not sent again. Downloads pick
//! the first variant present in catalog order.

mod engine;
mod error;
mod progress;
mod resolver;
mod session;
mod validation;

pub use engine::{DownloadOutcome, Engine, EngineConfig, UploadOutcome};
pub use error::{ConflictKind, TransferError};
pub use progress::{ProgressReader, ProgressWriter};
pub use resolver::Resolver;
pub use session::{Direction, Session, SessionState};
pub use validation::{MAX_OID_LEN, validate_oid};
