//! Bounded pipes between a codec worker thread and its consumer.
//!
//! A compressing transform owns the local source on its worker and feeds
//! encoded chunks into a [`TransformReader`]. A decompressing transform
//! receives encoded chunks from a [`TransformWriter`] and writes decoded
//! bytes to the local destination. Both sides block when the pipe is full
//! or empty, so memory use is bounded by `PIPE_DEPTH * PIPE_CHUNK_SIZE`.

use std::fmt;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::{CompressionError, PIPE_CHUNK_SIZE, PIPE_DEPTH};

type Packet = io::Result<Vec<u8>>;
type Worker = JoinHandle<io::Result<()>>;

/// Marks the error a worker sees once its consumer has gone away.
#[derive(Debug)]
struct PipeClosed;

impl fmt::Display for PipeClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("pipe closed by consumer")
    }
}

impl std::error::Error for PipeClosed {}

fn pipe_closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, PipeClosed)
}

fn is_pipe_closed(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<PipeClosed>())
}

fn copy_error(err: &io::Error) -> io::Error {
    io::Error::new(err.kind(), err.to_string())
}

fn surface(err: &CompressionError) -> io::Error {
    match err {
        CompressionError::Transform { source, .. } => io::Error::new(source.kind(), err.to_string()),
        other => io::Error::other(other.to_string()),
    }
}

fn join_worker(worker: Worker, variant: &'static str) -> Result<(), CompressionError> {
    match worker.join() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) if is_pipe_closed(&err) => {
            debug!(variant, "transform stopped after its consumer closed the pipe");
            Ok(())
        }
        Ok(Err(source)) => Err(CompressionError::Transform { variant, source }),
        Err(_) => Err(CompressionError::WorkerPanicked(variant)),
    }
}

// ---------------------------------------------------------------------------
// Worker-side adapters
// ---------------------------------------------------------------------------

/// Output sink handed to a compressing worker.
pub(crate) struct ChannelWriter {
    tx: SyncSender<Packet>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let n = buf.len().min(PIPE_CHUNK_SIZE);
        self.tx
            .send(Ok(buf[..n].to_vec()))
            .map_err(|_| pipe_closed())?;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Input source handed to a decompressing worker. Reports EOF once the
/// consumer finishes the pipe.
pub(crate) struct ChannelReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
}

impl Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.pos == self.chunk.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Spawns a worker that transforms `source` into the returned reader.
pub(crate) fn spawn_reader<S, F>(
    variant: &'static str,
    source: S,
    body: F,
) -> Result<TransformReader, CompressionError>
where
    S: Read + Send + 'static,
    F: FnOnce(S, ChannelWriter) -> io::Result<()> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<Packet>(PIPE_DEPTH);
    let errors = tx.clone();
    let worker = thread::Builder::new()
        .name(format!("{variant}-encode"))
        .spawn(move || {
            let result = body(source, ChannelWriter { tx });
            if let Err(err) = &result {
                if !is_pipe_closed(err) {
                    // The consumer may already be gone; the join result still carries it.
                    let _ = errors.send(Err(copy_error(err)));
                }
            }
            result
        })
        .map_err(|source| CompressionError::Spawn { variant, source })?;

    Ok(TransformReader {
        variant,
        inner: ReaderInner::Piped(PipedReader {
            rx: Some(rx),
            chunk: Vec::new(),
            pos: 0,
            worker: Some(worker),
            failure: None,
        }),
    })
}

/// Spawns a worker that transforms bytes written to the returned writer
/// into `dest`.
pub(crate) fn spawn_writer<D, F>(
    variant: &'static str,
    dest: D,
    body: F,
) -> Result<TransformWriter, CompressionError>
where
    D: Write + Send + 'static,
    F: FnOnce(ChannelReader, D) -> io::Result<()> + Send + 'static,
{
    let (tx, rx) = mpsc::sync_channel::<Vec<u8>>(PIPE_DEPTH);
    let worker = thread::Builder::new()
        .name(format!("{variant}-decode"))
        .spawn(move || {
            let input = ChannelReader {
                rx,
                chunk: Vec::new(),
                pos: 0,
            };
            body(input, dest)
        })
        .map_err(|source| CompressionError::Spawn { variant, source })?;

    Ok(TransformWriter {
        variant,
        inner: WriterInner::Piped(PipedWriter {
            tx: Some(tx),
            worker: Some(worker),
            failure: None,
        }),
    })
}

// ---------------------------------------------------------------------------
// TransformReader
// ---------------------------------------------------------------------------

/// The transformed view of a local source.
///
/// Call [`finish`](Self::finish) before trusting that the stream was
/// complete: it joins the worker and returns its first error.
pub struct TransformReader {
    variant: &'static str,
    inner: ReaderInner,
}

enum ReaderInner {
    Direct(Box<dyn Read + Send>),
    Piped(PipedReader),
}

struct PipedReader {
    rx: Option<Receiver<Packet>>,
    chunk: Vec<u8>,
    pos: usize,
    worker: Option<Worker>,
    failure: Option<(io::ErrorKind, String)>,
}

impl TransformReader {
    /// Wraps `source` without a worker; `finish` is a no-op.
    pub fn passthrough(variant: &'static str, source: Box<dyn Read + Send>) -> Self {
        Self {
            variant,
            inner: ReaderInner::Direct(source),
        }
    }

    /// Name of the variant that produced this stream.
    pub fn variant(&self) -> &'static str {
        self.variant
    }

    /// Stops the transform and waits for its worker.
    ///
    /// Finishing before the stream was drained is allowed; the worker is
    /// told to stop and that is not reported as an error.
    pub fn finish(self) -> Result<(), CompressionError> {
        match self.inner {
            ReaderInner::Direct(_) => Ok(()),
            ReaderInner::Piped(mut piped) => {
                drop(piped.rx.take());
                match piped.worker.take() {
                    Some(worker) => join_worker(worker, self.variant),
                    None => Ok(()),
                }
            }
        }
    }
}

impl PipedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.pos < self.chunk.len() {
                let n = buf.len().min(self.chunk.len() - self.pos);
                buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if let Some((kind, message)) = &self.failure {
                return Err(io::Error::new(*kind, message.clone()));
            }
            let Some(rx) = &self.rx else {
                return Ok(0);
            };
            match rx.recv() {
                Ok(Ok(chunk)) => {
                    self.chunk = chunk;
                    self.pos = 0;
                }
                Ok(Err(err)) => {
                    self.failure = Some((err.kind(), err.to_string()));
                    self.rx = None;
                }
                Err(_) => self.rx = None,
            }
        }
    }
}

impl Read for TransformReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            ReaderInner::Direct(source) => source.read(buf),
            ReaderInner::Piped(piped) => piped.read(buf),
        }
    }
}

// ---------------------------------------------------------------------------
// TransformWriter
// ---------------------------------------------------------------------------

/// The transforming view of a local destination.
///
/// Call [`finish`](Self::finish) once everything is written: it signals
/// end of input, waits for the worker and returns its first error.
pub struct TransformWriter {
    variant: &'static str,
    inner: WriterInner,
}

enum WriterInner {
    Direct(Box<dyn Write + Send>),
    Piped(PipedWriter),
}

struct PipedWriter {
    tx: Option<SyncSender<Vec<u8>>>,
    worker: Option<Worker>,
    failure: Option<CompressionError>,
}

impl TransformWriter {
    /// Wraps `dest` without a worker; `finish` only flushes it.
    pub fn passthrough(variant: &'static str, dest: Box<dyn Write + Send>) -> Self {
        Self {
            variant,
            inner: WriterInner::Direct(dest),
        }
    }

    /// Name of the variant that consumes this stream.
    pub fn variant(&self) -> &'static str {
        self.variant
    }

    /// Ends the input and waits for the worker to drain it.
    pub fn finish(self) -> Result<(), CompressionError> {
        let variant = self.variant;
        match self.inner {
            WriterInner::Direct(mut dest) => dest
                .flush()
                .map_err(|source| CompressionError::Transform { variant, source }),
            WriterInner::Piped(mut piped) => {
                drop(piped.tx.take());
                if let Some(failure) = piped.failure.take() {
                    return Err(failure);
                }
                match piped.worker.take() {
                    Some(worker) => join_worker(worker, variant),
                    None => Ok(()),
                }
            }
        }
    }
}

impl PipedWriter {
    fn write(&mut self, variant: &'static str, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(failure) = &self.failure {
            return Err(surface(failure));
        }
        let n = buf.len().min(PIPE_CHUNK_SIZE);
        if let Some(tx) = &self.tx {
            if tx.send(buf[..n].to_vec()).is_ok() {
                return Ok(n);
            }
        }

        // The worker hung up before the input ended.
        self.tx = None;
        let failure = match self.worker.take().map(|worker| join_worker(worker, variant)) {
            Some(Err(err)) => err,
            _ => CompressionError::Transform {
                variant,
                source: io::Error::new(
                    io::ErrorKind::InvalidData,
                    "decoder stopped before the end of its input",
                ),
            },
        };
        let surfaced = surface(&failure);
        self.failure = Some(failure);
        Err(surfaced)
    }
}

impl Write for TransformWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let variant = self.variant;
        match &mut self.inner {
            WriterInner::Direct(dest) => dest.write(buf),
            WriterInner::Piped(piped) => piped.write(variant, buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.inner {
            WriterInner::Direct(dest) => dest.flush(),
            WriterInner::Piped(piped) => match &piped.failure {
                Some(failure) => Err(surface(failure)),
                None => Ok(()),
            },
        }
    }
}
