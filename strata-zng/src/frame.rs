use std::io::{self, Read};

use strata_error::{StrataResult, strata_bail};

pub(crate) const CODE_TYPES: u8 = 0x00;
pub(crate) const CODE_VALUES: u8 = 0x01;
pub(crate) const CODE_EOS: u8 = 0x02;

pub(crate) const COMPRESSION_NONE: u8 = 0;
pub(crate) const COMPRESSION_LZ4: u8 = 1;

/// Upper bound on a single frame payload.
pub(crate) const MAX_FRAME_SIZE: u64 = 1 << 30;

/// A byte source that counts what it has consumed.
pub(crate) struct Counting<R> {
    pub(crate) inner: R,
    pub(crate) pos: u64,
}

impl<R: Read> Counting<R> {
    /// Read one byte, or `None` at a clean end of input.
    pub(crate) fn byte(&mut self) -> StrataResult<Option<u8>> {
        let mut b = [0u8; 1];
        loop {
            match self.inner.read(&mut b) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.pos += 1;
                    return Ok(Some(b[0]));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub(crate) fn uvarint(&mut self) -> StrataResult<u64> {
        let mut v: u64 = 0;
        for shift in (0..64).step_by(7) {
            let Some(b) = self.byte()? else {
                strata_bail!(Corruption: "truncated frame header");
            };
            v |= u64::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(v);
            }
        }
        strata_bail!(Corruption: "uvarint overflow in frame header")
    }

    pub(crate) fn exact(&mut self, len: u64) -> StrataResult<Vec<u8>> {
        if len > MAX_FRAME_SIZE {
            strata_bail!(Corruption: "frame of {len} bytes exceeds limit");
        }
        let mut buf = vec![0u8; usize::try_from(len).unwrap_or(usize::MAX)];
        self.inner.read_exact(&mut buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                strata_error::strata_err!(Corruption: "truncated frame")
            } else {
                e.into()
            }
        })?;
        self.pos += len;
        Ok(buf)
    }
}
