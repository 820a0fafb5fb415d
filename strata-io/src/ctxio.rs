//! Readers and writers that observe a [`CancelToken`] before each call into the wrapped stream.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::CancelToken;

fn cancelled(token: &CancelToken) -> io::Result<()> {
    token.check().map_err(io::Error::other)
}

/// A reader that fails once the query is cancelled.
pub struct CancelReader<R> {
    inner: R,
    token: CancelToken,
}

impl<R> CancelReader<R> {
    pub fn new(inner: R, token: CancelToken) -> Self {
        Self { inner, token }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for CancelReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        cancelled(&self.token)?;
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for CancelReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        cancelled(&self.token)?;
        self.inner.seek(pos)
    }
}

/// A writer that fails once the query is cancelled.
pub struct CancelWriter<W> {
    inner: W,
    token: CancelToken,
}

impl<W> CancelWriter<W> {
    pub fn new(inner: W, token: CancelToken) -> Self {
        Self { inner, token }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CancelWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        cancelled(&self.token)?;
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        cancelled(&self.token)?;
        self.inner.flush()
    }
}

/// Limits reads to `limit` bytes of the underlying reader, counting what was consumed.
pub struct LimitReader<R> {
    inner: R,
    remaining: u64,
    consumed: u64,
}

impl<R> LimitReader<R> {
    pub fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
            consumed: 0,
        }
    }

    /// Bytes read through this reader so far.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }
}

impl<R: Read> Read for LimitReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let max = usize::try_from(self.remaining).unwrap_or(usize::MAX).min(buf.len());
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n as u64;
        self.consumed += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use strata_error::StrataError;

    use super::*;

    #[test]
    fn reads_fail_after_cancel() {
        let token = CancelToken::new();
        let mut reader = CancelReader::new(Cursor::new(vec![1u8, 2, 3]), token.clone());
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        token.cancel();
        let err: StrataError = reader.read(&mut buf).unwrap_err().into();
        assert!(err.is_cancelled());
    }

    #[test]
    fn limit_reader_stops_at_limit() {
        let mut reader = LimitReader::new(Cursor::new(vec![7u8; 10]), 4);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(reader.consumed(), 4);
    }
}
