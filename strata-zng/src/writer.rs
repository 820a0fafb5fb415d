use std::io::Write;

use rustc_hash::FxHashMap;
use strata_error::StrataResult;
use strata_value::typevalue::encode_type;
use strata_value::{FIRST_COMPLEX_ID, Type, Value, zcode};

use crate::frame::{
    CODE_EOS, CODE_TYPES, CODE_VALUES, COMPRESSION_LZ4, COMPRESSION_NONE,
};

#[derive(Clone, Debug)]
pub struct WriterOptions {
    /// Flush a values frame once this many bytes are buffered.
    pub frame_size: usize,
    /// Compress frames with LZ4 when it makes them smaller.
    pub compress: bool,
    /// End the stream after this many records, if set.
    pub stream_records_max: Option<usize>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            frame_size: 512 * 1024,
            compress: true,
            stream_records_max: None,
        }
    }
}

/// Writes values as a framed record stream.
pub struct Writer<W> {
    inner: W,
    opts: WriterOptions,
    types: FxHashMap<Type, u32>,
    pending_types: Vec<u8>,
    values: Vec<u8>,
    stream_records: usize,
    pos: u64,
}

impl<W: Write> Writer<W> {
    pub fn new(inner: W, opts: WriterOptions) -> Self {
        Self {
            inner,
            opts,
            types: FxHashMap::default(),
            pending_types: Vec::new(),
            values: Vec::new(),
            stream_records: 0,
            pos: 0,
        }
    }

    /// Append a value. The stream is ended as soon as it holds `stream_records_max`
    /// records, so [`Writer::at_stream_start`] reports the boundary before the next write.
    pub fn write(&mut self, val: &Value) -> StrataResult<()> {
        let id = self.local_id(val.typ());
        zcode::append_uvarint(&mut self.values, u64::from(id));
        zcode::append(&mut self.values, val.body());
        self.stream_records += 1;
        if self
            .opts
            .stream_records_max
            .is_some_and(|max| self.stream_records >= max)
        {
            return self.end_stream();
        }
        if self.values.len() >= self.opts.frame_size {
            self.flush_frame()?;
        }
        Ok(())
    }

    fn local_id(&mut self, typ: &Type) -> u32 {
        if let Some(p) = typ.as_primitive() {
            return p.id();
        }
        if let Some(id) = self.types.get(typ) {
            return *id;
        }
        let id = FIRST_COMPLEX_ID + u32::try_from(self.types.len()).unwrap_or(u32::MAX);
        encode_type(typ, &mut self.pending_types);
        self.types.insert(typ.clone(), id);
        id
    }

    /// Write out any buffered type definitions and values.
    pub fn flush_frame(&mut self) -> StrataResult<()> {
        if !self.pending_types.is_empty() {
            let payload = std::mem::take(&mut self.pending_types);
            self.write_frame(CODE_TYPES, &payload)?;
        }
        if !self.values.is_empty() {
            let payload = std::mem::take(&mut self.values);
            self.write_frame(CODE_VALUES, &payload)?;
        }
        Ok(())
    }

    /// Flush and terminate the current stream. A no-op at a stream start.
    pub fn end_stream(&mut self) -> StrataResult<()> {
        if self.at_stream_start() {
            return Ok(());
        }
        self.flush_frame()?;
        self.emit(&[CODE_EOS])?;
        self.types.clear();
        self.stream_records = 0;
        Ok(())
    }

    /// True when the next record written begins a new stream.
    pub fn at_stream_start(&self) -> bool {
        self.stream_records == 0 && self.types.is_empty()
    }

    /// Bytes handed to the underlying writer so far. At a stream start this is the offset of
    /// the stream about to begin.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Bytes buffered and not yet framed.
    pub fn buffered(&self) -> usize {
        self.values.len() + self.pending_types.len()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    /// End the stream, flush the underlying writer and return it.
    pub fn close(mut self) -> StrataResult<W> {
        self.end_stream()?;
        self.inner.flush()?;
        Ok(self.inner)
    }

    fn write_frame(&mut self, code: u8, payload: &[u8]) -> StrataResult<()> {
        let mut header = Vec::with_capacity(16);
        header.push(code);
        zcode::append_uvarint(&mut header, payload.len() as u64);
        if self.opts.compress {
            let compressed = lz4_flex::block::compress(payload);
            if compressed.len() < payload.len() {
                header.push(COMPRESSION_LZ4);
                zcode::append_uvarint(&mut header, compressed.len() as u64);
                self.emit(&header)?;
                return self.emit(&compressed);
            }
        }
        header.push(COMPRESSION_NONE);
        self.emit(&header)?;
        self.emit(payload)
    }

    fn emit(&mut self, bytes: &[u8]) -> StrataResult<()> {
        self.inner.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use strata_value::TypeContext;

    use super::*;
    use crate::Reader;

    #[test]
    fn streams_restart_after_max_records() {
        let ctx = TypeContext::new();
        let mut w = Writer::new(
            Vec::new(),
            WriterOptions {
                stream_records_max: Some(2),
                ..Default::default()
            },
        );
        let mut starts = Vec::new();
        for i in 0..5 {
            if w.at_stream_start() {
                starts.push(w.position());
            }
            let rec = Value::record(&ctx, [("a", Value::int64(i))]).unwrap();
            w.write(&rec).unwrap();
        }
        let bytes = w.close().unwrap();
        assert_eq!(starts.len(), 3);
        assert_eq!(starts[0], 0);

        // Every recorded stream start is a valid place to begin decoding.
        for (n, start) in starts.iter().enumerate() {
            let offset = usize::try_from(*start).unwrap();
            let vals = crate::read_all(&TypeContext::new(), &bytes[offset..]).unwrap();
            assert_eq!(vals.len(), 5 - 2 * n);
            assert_eq!(vals[0].field("a").unwrap().as_int(), Some(2 * n as i64));
        }
    }

    #[test]
    fn compressed_frames_round_trip() {
        let ctx = TypeContext::new();
        let text = "abcdefgh".repeat(64);
        let vals: Vec<Value> = (0..100)
            .map(|i| {
                Value::record(&ctx, [("s", Value::string(&text)), ("i", Value::int64(i))]).unwrap()
            })
            .collect();
        let mut w = Writer::new(
            Vec::new(),
            WriterOptions {
                frame_size: 4096,
                ..Default::default()
            },
        );
        for v in &vals {
            w.write(v).unwrap();
        }
        let bytes = w.close().unwrap();
        assert!(bytes.len() < text.len() * 10);

        let mut r = Reader::new(ctx, bytes.as_slice());
        let mut n = 0;
        while let Some(v) = r.read().unwrap() {
            assert_eq!(v, vals[n]);
            n += 1;
        }
        assert_eq!(n, vals.len());
    }
}
