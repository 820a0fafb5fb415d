//! Sorted, keyed record files with a sparse base index.
//!
//! Layout: the key-sorted data records, cut into independent streams of about
//! `frame_thresh` bytes; then one stream of base records `{<keys>, _child: int64}` giving the
//! first key of each data stream and its offset; then a trailer stream holding a single
//! record; then a fixed tail of the trailer length (u32 little endian) and [`TAIL_MAGIC`].

use std::cmp::Ordering;

use bytes::Bytes;
use itertools::Itertools;
use serde::Deserialize;
use strata_error::{StrataResult, strata_bail, strata_err};
use strata_expr::compare_total;
use strata_io::{Mux, Source, Uri};
use strata_value::{FieldPath, TypeContext, Value, json};

use crate::{Reader, Writer, WriterOptions};

pub const MAGIC: &str = "microindex";
pub const VERSION: i64 = 2;
pub const CHILD_FIELD: &str = "_child";
pub const TAIL_MAGIC: &[u8; 8] = b"microidx";
const TAIL_LEN: usize = 12;

pub const DEFAULT_FRAME_THRESH: usize = 32 * 1024;

#[derive(Clone, Debug)]
pub struct IndexOptions {
    pub keys: Vec<FieldPath>,
    pub frame_thresh: usize,
    pub descending: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            keys: vec![FieldPath::dotted("key")],
            frame_thresh: DEFAULT_FRAME_THRESH,
            descending: false,
        }
    }
}

/// The decoded trailer record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Trailer {
    pub descending: bool,
    pub child_field: String,
    pub frame_thresh: usize,
    /// Byte lengths of the data section and the base index section.
    pub sections: Vec<i64>,
    pub keys: Vec<FieldPath>,
}

#[derive(Deserialize)]
struct RawTrailer {
    magic: String,
    version: i64,
    descending: bool,
    child_field: String,
    frame_thresh: i64,
    sections: Vec<i64>,
    keys: Vec<String>,
}

impl Trailer {
    fn to_value(&self, ctx: &TypeContext) -> StrataResult<Value> {
        let sections: Vec<Value> = self.sections.iter().map(|s| Value::int64(*s)).collect();
        let keys: Vec<Value> = self
            .keys
            .iter()
            .map(|k| Value::string(&k.to_string()))
            .collect();
        Value::record(
            ctx,
            [
                ("magic", Value::string(MAGIC)),
                ("version", Value::int64(VERSION)),
                ("descending", Value::bool(self.descending)),
                ("child_field", Value::string(&self.child_field)),
                (
                    "frame_thresh",
                    Value::int64(i64::try_from(self.frame_thresh).unwrap_or(i64::MAX)),
                ),
                ("sections", Value::array(ctx, &strata_value::Type::INT64, &sections)?),
                ("keys", Value::array(ctx, &strata_value::Type::STRING, &keys)?),
            ],
        )
    }

    fn from_value(val: &Value) -> StrataResult<Self> {
        let raw: RawTrailer = json::to_struct(val)?;
        if raw.magic != MAGIC {
            strata_bail!(Corruption: "bad micro-index magic '{}'", raw.magic);
        }
        if raw.version != VERSION {
            strata_bail!(Corruption: "unsupported micro-index version {}", raw.version);
        }
        Ok(Self {
            descending: raw.descending,
            child_field: raw.child_field,
            frame_thresh: usize::try_from(raw.frame_thresh).unwrap_or_default(),
            sections: raw.sections,
            keys: raw.keys.iter().map(|k| FieldPath::dotted(k)).collect(),
        })
    }
}

/// Compare key tuples over the length of the shorter one.
fn compare_keys(a: &[Value], b: &[Value], descending: bool) -> Ordering {
    let ord = a
        .iter()
        .zip(b)
        .map(|(x, y)| compare_total(x, y, true))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal);
    if descending { ord.reverse() } else { ord }
}

fn key_tuple(keys: &[FieldPath], val: &Value) -> Vec<Value> {
    keys.iter()
        .map(|k| val.deref(k).unwrap_or_else(Value::null))
        .collect()
}

/// Builds a micro-index file. Records must arrive in key order.
pub struct IndexWriter {
    mux: Mux,
    uri: Uri,
    opts: IndexOptions,
    ctx: TypeContext,
    data: Writer<Vec<u8>>,
    base: Vec<(Vec<Value>, i64)>,
    stream_bytes: usize,
    last_key: Option<Vec<Value>>,
}

impl IndexWriter {
    pub fn create(mux: &Mux, uri: Uri, opts: IndexOptions) -> StrataResult<Self> {
        if opts.keys.is_empty() {
            strata_bail!(Invalid: "micro-index requires at least one key");
        }
        let data = Writer::new(
            Vec::new(),
            WriterOptions {
                frame_size: opts.frame_thresh.max(1),
                compress: true,
                stream_records_max: None,
            },
        );
        Ok(Self {
            mux: mux.clone(),
            uri,
            opts,
            ctx: TypeContext::new(),
            data,
            base: Vec::new(),
            stream_bytes: 0,
            last_key: None,
        })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn keys(&self) -> &[FieldPath] {
        &self.opts.keys
    }

    pub fn write(&mut self, val: &Value) -> StrataResult<()> {
        let key = key_tuple(&self.opts.keys, val);
        if let Some(last) = &self.last_key {
            if compare_keys(last, &key, self.opts.descending).is_gt() {
                strata_bail!(
                    Invalid: "micro-index keys out of order: {} after {}",
                    key.iter().join(","),
                    last.iter().join(",")
                );
            }
        }
        if self.data.at_stream_start() {
            let off = i64::try_from(self.data.position()).unwrap_or(i64::MAX);
            self.base.push((key.clone(), off));
        }
        self.data.write(val)?;
        self.stream_bytes += val.size();
        if self.stream_bytes >= self.opts.frame_thresh {
            self.data.end_stream()?;
            self.stream_bytes = 0;
        }
        self.last_key = Some(key);
        Ok(())
    }

    /// Finish the index and write it out. A failed write removes the partial file.
    pub fn close(self) -> StrataResult<()> {
        let mux = self.mux.clone();
        let uri = self.uri.clone();
        let result = self
            .into_bytes()
            .and_then(|bytes| mux.write_all(&uri, &bytes));
        if result.is_err() {
            if let Err(err) = mux.remove(&uri) {
                if !err.is_not_found() {
                    log::warn!("removing partial index {uri}: {err}");
                }
            }
        }
        result
    }

    fn into_bytes(self) -> StrataResult<Vec<u8>> {
        let mut out = self.data.close()?;
        let data_len = out.len();
        let mut base = Writer::new(Vec::new(), WriterOptions::default());
        for (key, off) in &self.base {
            let fields = self
                .opts
                .keys
                .iter()
                .map(ToString::to_string)
                .zip(key.iter().cloned())
                .chain(std::iter::once((CHILD_FIELD.to_string(), Value::int64(*off))));
            base.write(&Value::record(&self.ctx, fields)?)?;
        }
        let base = base.close()?;
        let sections = if self.base.is_empty() {
            Vec::new()
        } else {
            vec![data_len as i64, base.len() as i64]
        };
        out.extend_from_slice(&base);

        let trailer = Trailer {
            descending: self.opts.descending,
            child_field: CHILD_FIELD.to_string(),
            frame_thresh: self.opts.frame_thresh,
            sections,
            keys: self.opts.keys.clone(),
        };
        let trailer = crate::write_all(&[trailer.to_value(&self.ctx)?])?;
        let trailer_len = u32::try_from(trailer.len())
            .map_err(|_| strata_err!("micro-index trailer too large"))?;
        out.extend_from_slice(&trailer);
        out.extend_from_slice(&trailer_len.to_le_bytes());
        out.extend_from_slice(TAIL_MAGIC);
        Ok(out)
    }

    /// Discard the index, removing any file already written.
    pub fn abort(self) -> StrataResult<()> {
        match self.mux.remove(&self.uri) {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexStat {
    pub keys: Vec<FieldPath>,
    pub size: u64,
    pub descending: bool,
    pub frame_thresh: usize,
}

/// Looks up keys in a micro-index held in memory.
pub struct Finder {
    ctx: TypeContext,
    bytes: Bytes,
    trailer: Trailer,
    /// First key of each data stream and the stream's byte range.
    frames: Vec<(Vec<Value>, usize, usize)>,
}

impl Finder {
    pub fn open(mux: &Mux, uri: &Uri, ctx: &TypeContext) -> StrataResult<Self> {
        Self::from_bytes(ctx, mux.read_all(uri)?)
            .map_err(|e| e.with_context(format!("micro-index {uri}")))
    }

    pub fn from_bytes(ctx: &TypeContext, bytes: Bytes) -> StrataResult<Self> {
        let len = bytes.len();
        if len < TAIL_LEN || &bytes[len - 8..] != TAIL_MAGIC {
            strata_bail!(Corruption: "not a micro-index");
        }
        let mut trailer_len = [0u8; 4];
        trailer_len.copy_from_slice(&bytes[len - TAIL_LEN..len - 8]);
        let trailer_len = u32::from_le_bytes(trailer_len) as usize;
        let trailer_start = (len - TAIL_LEN)
            .checked_sub(trailer_len)
            .ok_or_else(|| strata_err!(Corruption: "micro-index trailer overruns file"))?;
        let mut reader = Reader::new(TypeContext::new(), &bytes[trailer_start..len - TAIL_LEN]);
        let trailer = reader
            .read()?
            .ok_or_else(|| strata_err!(Corruption: "micro-index trailer missing"))?;
        let trailer = Trailer::from_value(&trailer)?;

        let mut frames = Vec::new();
        if let [data_len, base_len] = trailer.sections[..] {
            let data_len = usize::try_from(data_len).unwrap_or(usize::MAX);
            let base_end = usize::try_from(base_len)
                .ok()
                .and_then(|b| data_len.checked_add(b))
                .filter(|end| *end <= trailer_start)
                .ok_or_else(|| strata_err!(Corruption: "micro-index sections overrun file"))?;
            let nkeys = trailer.keys.len();
            let mut offsets = Vec::new();
            for base in Reader::new(ctx.clone(), &bytes[data_len..base_end]) {
                let base = base?;
                let cols = base.columns()?;
                if cols.len() != nkeys + 1 {
                    strata_bail!(Corruption: "micro-index base record has {} columns", cols.len());
                }
                let off = cols[nkeys]
                    .1
                    .as_int()
                    .and_then(|o| usize::try_from(o).ok())
                    .ok_or_else(|| strata_err!(Corruption: "bad micro-index child offset"))?;
                let key: Vec<Value> = cols[..nkeys].iter().map(|(_, v)| v.clone()).collect();
                offsets.push((key, off));
            }
            for (i, (key, start)) in offsets.iter().enumerate() {
                let end = offsets.get(i + 1).map_or(data_len, |(_, next)| *next);
                if *start > end || end > data_len {
                    strata_bail!(Corruption: "micro-index frame offsets out of order");
                }
                frames.push((key.clone(), *start, end));
            }
        }
        Ok(Self {
            ctx: ctx.clone(),
            bytes,
            trailer,
            frames,
        })
    }

    pub fn trailer(&self) -> &Trailer {
        &self.trailer
    }

    pub fn keys(&self) -> &[FieldPath] {
        &self.trailer.keys
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn stat(&self) -> IndexStat {
        IndexStat {
            keys: self.trailer.keys.clone(),
            size: self.bytes.len() as u64,
            descending: self.trailer.descending,
            frame_thresh: self.trailer.frame_thresh,
        }
    }

    fn frame(&self, idx: usize) -> StrataResult<Vec<Value>> {
        let (_, start, end) = &self.frames[idx];
        crate::read_all(&self.ctx, &self.bytes[*start..*end])
    }

    /// Records whose leading keys equal `keys`. Fewer keys than the index has match as a
    /// prefix.
    pub fn lookup(&self, keys: &[Value]) -> StrataResult<Vec<Value>> {
        if keys.len() > self.trailer.keys.len() {
            strata_bail!(
                Invalid: "lookup with {} keys in an index with {}",
                keys.len(),
                self.trailer.keys.len()
            );
        }
        let desc = self.trailer.descending;
        // The first frame starting at or past the key; the one before may hold it too.
        let start = self
            .frames
            .partition_point(|(first, ..)| compare_keys(first, keys, desc).is_lt());
        let mut out = Vec::new();
        for idx in start.saturating_sub(1)..self.frames.len() {
            if idx > start.saturating_sub(1) && compare_keys(&self.frames[idx].0, keys, desc).is_gt()
            {
                break;
            }
            for val in self.frame(idx)? {
                let ord = compare_keys(&key_tuple(&self.trailer.keys, &val), keys, desc);
                match ord {
                    Ordering::Equal => out.push(val),
                    Ordering::Greater => return Ok(out),
                    Ordering::Less => {}
                }
            }
        }
        Ok(out)
    }

    /// Every data record, in key order.
    pub fn entries(&self) -> StrataResult<Vec<Value>> {
        let mut out = Vec::new();
        for idx in 0..self.frames.len() {
            out.extend(self.frame(idx)?);
        }
        Ok(out)
    }
}
