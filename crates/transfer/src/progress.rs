use std::io::{self, Read, Write};

/// Counts bytes read through it and reports each non-empty read.
pub struct ProgressReader<'a, R> {
    inner: R,
    on_progress: &'a mut dyn FnMut(u64),
    transferred: u64,
}

impl<'a, R: Read> ProgressReader<'a, R> {
    pub fn new(inner: R, on_progress: &'a mut dyn FnMut(u64)) -> Self {
        Self {
            inner,
            on_progress,
            transferred: 0,
        }
    }

    /// Total bytes reported so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n > 0 {
            self.transferred += n as u64;
            (self.on_progress)(n as u64);
        }
        Ok(n)
    }
}

/// Counts bytes written through it and reports each non-empty write.
pub struct ProgressWriter<'a, W> {
    inner: W,
    on_progress: &'a mut dyn FnMut(u64),
    transferred: u64,
}

impl<'a, W: Write> ProgressWriter<'a, W> {
    pub fn new(inner: W, on_progress: &'a mut dyn FnMut(u64)) -> Self {
        Self {
            inner,
            on_progress,
            transferred: 0,
        }
    }

    /// Total bytes reported so far.
    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for ProgressWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        if n > 0 {
            self.transferred += n as u64;
            (self.on_progress)(n as u64);
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
