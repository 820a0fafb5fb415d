use std::io::{BufReader, Read};

use bytes::Bytes;
use strata_error::{StrataResult, strata_bail, strata_err};
use strata_value::typevalue::decode_type;
use strata_value::{FIRST_COMPLEX_ID, PrimitiveType, Type, TypeContext, Value, zcode};

use crate::frame::{
    CODE_EOS, CODE_TYPES, CODE_VALUES, COMPRESSION_LZ4, COMPRESSION_NONE, Counting,
};

/// Decodes a framed record stream into values of a [`TypeContext`].
pub struct Reader<R> {
    input: Counting<BufReader<R>>,
    ctx: TypeContext,
    types: Vec<Type>,
    type_defs: Vec<u8>,
    frame: Bytes,
    off: usize,
}

impl<R: Read> Reader<R> {
    pub fn new(ctx: TypeContext, inner: R) -> Self {
        Self {
            input: Counting {
                inner: BufReader::new(inner),
                pos: 0,
            },
            ctx,
            types: Vec::new(),
            type_defs: Vec::new(),
            frame: Bytes::new(),
            off: 0,
        }
    }

    pub fn context(&self) -> &TypeContext {
        &self.ctx
    }

    /// The next value, or `None` at the end of input.
    pub fn read(&mut self) -> StrataResult<Option<Value>> {
        loop {
            if self.off < self.frame.len() {
                let (val, n) = self.decode_at(&self.frame, self.off)?;
                self.off = n;
                return Ok(Some(val));
            }
            match self.read_values_frame()? {
                Some(frame) => {
                    self.frame = frame;
                    self.off = 0;
                }
                None => return Ok(None),
            }
        }
    }

    /// The next uncompressed values payload, consuming any type definitions and
    /// end-of-stream markers on the way. Values left undecoded in the previous payload are
    /// skipped.
    pub fn read_values_frame(&mut self) -> StrataResult<Option<Bytes>> {
        self.frame = Bytes::new();
        self.off = 0;
        loop {
            let Some(code) = self.input.byte()? else {
                return Ok(None);
            };
            match code {
                CODE_EOS => {
                    self.types.clear();
                    self.type_defs.clear();
                }
                CODE_TYPES => {
                    let payload = self.payload()?;
                    let mut buf = payload.as_ref();
                    while !buf.is_empty() {
                        let typ = decode_type(&self.ctx, &mut buf)?;
                        self.types.push(typ);
                    }
                    self.type_defs.extend_from_slice(&payload);
                }
                CODE_VALUES => return self.payload().map(Some),
                other => strata_bail!(Corruption: "unknown frame code {other:#04x}"),
            }
        }
    }

    fn payload(&mut self) -> StrataResult<Bytes> {
        let len = self.input.uvarint()?;
        let Some(compression) = self.input.byte()? else {
            strata_bail!(Corruption: "truncated frame header");
        };
        match compression {
            COMPRESSION_NONE => Ok(Bytes::from(self.input.exact(len)?)),
            COMPRESSION_LZ4 => {
                let clen = self.input.uvarint()?;
                let compressed = self.input.exact(clen)?;
                let size = usize::try_from(len).unwrap_or(usize::MAX);
                let out = lz4_flex::block::decompress(&compressed, size)
                    .map_err(|e| strata_err!(Corruption: "lz4 frame: {e}"))?;
                if out.len() != size {
                    strata_bail!(Corruption: "lz4 frame: expected {size} bytes, got {}", out.len());
                }
                Ok(Bytes::from(out))
            }
            other => strata_bail!(Corruption: "unknown frame compression {other}"),
        }
    }

    /// Decode every value of a payload returned by [`Reader::read_values_frame`]. Must be
    /// called before the next frame is read so the type table is still current.
    pub fn decode_frame(&self, frame: &Bytes) -> StrataResult<Vec<Value>> {
        let mut out = Vec::new();
        let mut off = 0;
        while off < frame.len() {
            let (val, n) = self.decode_at(frame, off)?;
            out.push(val);
            off = n;
        }
        Ok(out)
    }

    fn decode_at(&self, frame: &Bytes, off: usize) -> StrataResult<(Value, usize)> {
        let (id, n) = zcode::read_uvarint(&frame[off..])?;
        let typ = self.lookup(id)?;
        let off = off + n;
        let (tag, n) = zcode::read_uvarint(&frame[off..])?;
        let off = off + n;
        if tag == 0 {
            return Ok((Value::new(typ, None), off));
        }
        let end = usize::try_from(tag - 1)
            .ok()
            .and_then(|len| off.checked_add(len))
            .filter(|end| *end <= frame.len())
            .ok_or_else(|| strata_err!(Corruption: "value body overruns frame"))?;
        Ok((Value::new(typ, Some(frame.slice(off..end))), end))
    }

    fn lookup(&self, id: u64) -> StrataResult<Type> {
        let id = u32::try_from(id).map_err(|_| strata_err!(Corruption: "type id {id} out of range"))?;
        if id < FIRST_COMPLEX_ID {
            return PrimitiveType::from_id(id)
                .map(Type::primitive)
                .ok_or_else(|| strata_err!(Corruption: "unknown primitive type id {id}"));
        }
        self.types
            .get((id - FIRST_COMPLEX_ID) as usize)
            .cloned()
            .ok_or_else(|| strata_err!(Corruption: "undefined type id {id}"))
    }

    /// The raw type definitions of the current stream.
    pub fn type_defs(&self) -> &[u8] {
        &self.type_defs
    }

    /// Bytes consumed from the underlying reader.
    pub fn position(&self) -> u64 {
        self.input.pos
    }
}

impl<R: Read> Iterator for Reader<R> {
    type Item = StrataResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}
