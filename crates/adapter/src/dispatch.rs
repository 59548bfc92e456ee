//! Turns decoded git-lfs requests into engine calls and protocol replies.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use lfs_s3_protocol::{
    Event, InitResponse, Operation, ProtocolError, Request, Response, decode_line, write_message,
};
use lfs_s3_transfer::{Engine, TransferError, validate_oid};
use tracing::{debug, info, warn};

use crate::{AdapterConfig, AdapterError, build_engine};

/// Whether the caller should keep feeding requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Builds the engine on first use.
pub type EngineFactory = Box<dyn FnMut() -> Result<Engine, AdapterError> + Send>;

/// Handles one request at a time for a single git-lfs session.
pub struct Dispatcher {
    engine: Option<Engine>,
    factory: Option<EngineFactory>,
    operation: Option<Operation>,
    download_dir: PathBuf,
}

impl Dispatcher {
    /// Creates a dispatcher that connects to the store described by `config`
    /// when git-lfs sends `init`.
    pub fn new(config: AdapterConfig) -> Self {
        let download_dir = config.download_dir.clone();
        Self::with_factory(Box::new(move || build_engine(&config)), download_dir)
    }

    /// Uses `factory` to build the engine lazily.
    pub fn with_factory(factory: EngineFactory, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine: None,
            factory: Some(factory),
            operation: None,
            download_dir: download_dir.into(),
        }
    }

    /// Uses an engine that is already built.
    pub fn with_engine(engine: Engine, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine: Some(engine),
            factory: None,
            operation: None,
            download_dir: download_dir.into(),
        }
    }

    /// The operation announced by `init`, if any.
    pub fn operation(&self) -> Option<Operation> {
        self.operation
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Decodes `line` and handles it.
    pub fn handle_line<W: Write>(&mut self, line: &str, out: &mut W) -> Result<Flow, AdapterError> {
        let request = decode_line(line)?;
        self.handle(&request, out)
    }

    /// Handles one request, writing every reply to `out`.
    ///
    /// Transfer failures are reported to git-lfs and are not errors here;
    /// `Err` means `out` could not be written or the request was unusable.
    pub fn handle<W: Write>(&mut self, request: &Request, out: &mut W) -> Result<Flow, AdapterError> {
        match request.event {
            Event::Init => {
                self.init(request, out)?;
                Ok(Flow::Continue)
            }
            Event::Upload => {
                self.upload(request, out)?;
                Ok(Flow::Continue)
            }
            Event::Download => {
                self.download(request, out)?;
                Ok(Flow::Continue)
            }
            Event::Terminate => {
                info!("terminate received");
                Ok(Flow::Stop)
            }
            Event::Unknown => {
                warn!(?request, "ignoring unknown event");
                Ok(Flow::Continue)
            }
        }
    }

    fn init<W: Write>(&mut self, request: &Request, out: &mut W) -> Result<(), AdapterError> {
        self.operation = request.operation;
        info!(
            operation = ?request.operation,
            concurrent_transfers = ?request.concurrent_transfers,
            "init"
        );
        let response = match self.engine() {
            Ok(_) => InitResponse::ok(),
            Err(e) => {
                warn!(error = %e, "engine setup failed");
                InitResponse::failed(e.code(), e.to_string())
            }
        };
        write_message(out, &response)?;
        Ok(())
    }

    fn upload<W: Write>(&mut self, request: &Request, out: &mut W) -> Result<(), AdapterError> {
        let oid = request.require_oid()?;
        debug!(oid, size = ?request.size, "upload requested");

        let path = match request.require_path() {
            Ok(path) => PathBuf::from(path),
            Err(e) => return Ok(write_message(out, &Response::failed(oid, 400, e.to_string()))?),
        };
        let engine = match self.engine() {
            Ok(engine) => engine,
            Err(e) => return Ok(write_message(out, &Response::failed(oid, e.code(), e.to_string()))?),
        };

        let mut reporter = ProgressReporter::new(oid, out);
        let result = engine.upload(oid, &path, &mut |n| reporter.report(n));
        reporter.finish()?;

        let response = match result {
            Ok(_) => Response::completed(oid, None),
            Err(e) => failure(oid, &e),
        };
        write_message(out, &response)?;
        Ok(())
    }

    fn download<W: Write>(&mut self, request: &Request, out: &mut W) -> Result<(), AdapterError> {
        let oid = request.require_oid()?;
        debug!(oid, size = ?request.size, "download requested");

        // The oid becomes a file name; check it before building the path.
        if let Err(e) = validate_oid(oid) {
            return Ok(write_message(out, &failure(oid, &e))?);
        }
        if let Err(e) = fs::create_dir_all(&self.download_dir) {
            let e = TransferError::LocalFile {
                path: self.download_dir.clone(),
                source: e,
            };
            return Ok(write_message(out, &failure(oid, &e))?);
        }
        let dest = self.download_dir.join(oid);

        let engine = match self.engine() {
            Ok(engine) => engine,
            Err(e) => return Ok(write_message(out, &Response::failed(oid, e.code(), e.to_string()))?),
        };

        let mut reporter = ProgressReporter::new(oid, out);
        let result = engine.download(oid, &dest, &mut |n| reporter.report(n));
        reporter.finish()?;

        let response = match result {
            Ok(_) => Response::completed(oid, Some(dest.to_string_lossy().into_owned())),
            Err(e) => {
                remove_partial(&dest);
                failure(oid, &e)
            }
        };
        write_message(out, &response)?;
        Ok(())
    }

    fn engine(&mut self) -> Result<&Engine, AdapterError> {
        if self.engine.is_none() {
            let factory = self
                .factory
                .as_mut()
                .ok_or_else(|| AdapterError::Config("no engine configured".into()))?;
            self.engine = Some(factory()?);
        }
        self.engine
            .as_ref()
            .ok_or_else(|| AdapterError::Config("no engine configured".into()))
    }
}

/// Forwards engine progress as protocol messages.
///
/// The engine callback cannot fail, so the first write error is kept and
/// returned by [`finish`](Self::finish).
struct ProgressReporter<'a, W> {
    oid: &'a str,
    out: &'a mut W,
    so_far: u64,
    error: Option<ProtocolError>,
}

impl<'a, W: Write> ProgressReporter<'a, W> {
    fn new(oid: &'a str, out: &'a mut W) -> Self {
        Self {
            oid,
            out,
            so_far: 0,
            error: None,
        }
    }

    fn report(&mut self, delta: u64) {
        self.so_far += delta;
        if self.error.is_some() {
            return;
        }
        if let Err(e) = write_message(self.out, &Response::progress(self.oid, self.so_far, delta)) {
            self.error = Some(e);
        }
    }

    fn finish(self) -> Result<(), ProtocolError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn failure(oid: &str, err: &TransferError) -> Response {
    warn!(oid, code = err.code(), error = %err, "transfer failed");
    Response::failed(oid, i32::from(err.code()), err.to_string())
}

fn remove_partial(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial download"),
    }
}
