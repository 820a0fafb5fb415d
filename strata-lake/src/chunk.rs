use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::io::{Read, Seek, SeekFrom};
use std::sync::LazyLock;

use regex::Regex;
use strata_error::{IgnoreNotFound, StrataResult, strata_bail, strata_err};
use strata_io::ctxio::LimitReader;
use strata_io::{Reader as IoReader, Source, Uri};
use strata_value::{Order, Span, Ts, Type, TypeContext, Value};

use crate::{Archive, CacheKind, Ksuid, SeekIndex};

static FILE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::unwrap_used)]
    Regex::new(r"^(d|m|ts)-([0-9A-Za-z]{27})\.zng$").unwrap()
});

/// Suffix of a chunk's sidecar directory, appended to the data file name.
pub const SIDECAR_SUFFIX: &str = ".zar";
/// The [`Chunk::localize`] name of the data file itself.
pub const DATA_FILE_ALIAS: &str = "_";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileKind {
    Data,
    Metadata,
    Seek,
}

impl FileKind {
    pub fn prefix(self) -> &'static str {
        match self {
            FileKind::Data => "d",
            FileKind::Metadata => "m",
            FileKind::Seek => "ts",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s {
            "d" => Some(FileKind::Data),
            "m" => Some(FileKind::Metadata),
            "ts" => Some(FileKind::Seek),
            _ => None,
        }
    }

    pub fn file_name(self, id: &Ksuid) -> String {
        format!("{}-{id}.zng", self.prefix())
    }
}

/// The kind and chunk id of a chunk file name.
pub fn file_match(name: &str) -> Option<(FileKind, Ksuid)> {
    let caps = FILE_NAME.captures(name)?;
    let kind = FileKind::from_prefix(caps.get(1)?.as_str())?;
    let id = Ksuid::parse(caps.get(2)?.as_str()).ok()?;
    Some((kind, id))
}

/// The contents of a chunk's metadata sidecar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub first: Ts,
    pub last: Ts,
    pub record_count: u64,
    pub masks: Vec<Ksuid>,
    pub size: i64,
}

impl ChunkMetadata {
    pub fn to_value(&self, ctx: &TypeContext) -> StrataResult<Value> {
        let masks: Vec<Value> = self
            .masks
            .iter()
            .map(|id| Value::bytes_value(id.as_bytes()))
            .collect();
        Value::record(
            ctx,
            [
                ("first", Value::time(self.first)),
                ("last", Value::time(self.last)),
                ("record_count", Value::uint64(self.record_count)),
                ("masks", Value::array(ctx, &Type::BYTES, &masks)?),
                ("size", Value::int64(self.size)),
            ],
        )
    }

    pub fn from_value(val: &Value) -> StrataResult<Self> {
        let field = |name: &str| {
            val.field(name)
                .ok_or_else(|| strata_err!(Corruption: "chunk metadata lacks {name}"))
        };
        let bad = |name: &str| strata_err!(Corruption: "chunk metadata has a bad {name}");
        let masks = field("masks")?;
        let masks = if masks.is_null() {
            Vec::new()
        } else {
            masks
                .elements()?
                .iter()
                .map(|m| m.body().ok_or_else(|| bad("mask")).and_then(Ksuid::from_bytes))
                .collect::<StrataResult<_>>()?
        };
        Ok(Self {
            first: field("first")?.as_time().ok_or_else(|| bad("first"))?,
            last: field("last")?.as_time().ok_or_else(|| bad("last"))?,
            record_count: field("record_count")?
                .as_uint()
                .ok_or_else(|| bad("record_count"))?,
            masks,
            size: field("size")?.as_int().ok_or_else(|| bad("size"))?,
        })
    }

    /// Whether `first` and `last` agree with `order`.
    pub fn check_order(&self, order: Order) -> StrataResult<()> {
        let ok = match order {
            Order::Asc => self.first <= self.last,
            Order::Desc => self.first >= self.last,
        };
        if !ok {
            strata_bail!(
                Corruption: "chunk metadata first {} and last {} disagree with {order} order",
                self.first,
                self.last
            );
        }
        Ok(())
    }
}

/// An immutable run of `ts`-ordered records in one bucket directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub dir: Uri,
    pub id: Ksuid,
    pub first: Ts,
    pub last: Ts,
    pub record_count: u64,
    pub size: i64,
    pub masks: Vec<Ksuid>,
}

impl Chunk {
    pub fn new(dir: Uri, id: Ksuid, md: ChunkMetadata) -> Self {
        Self {
            dir,
            id,
            first: md.first,
            last: md.last,
            record_count: md.record_count,
            size: md.size,
            masks: md.masks,
        }
    }

    /// Read the metadata sidecar of chunk `id` in bucket `dir`.
    pub fn open(ark: &Archive, dir: &Uri, id: Ksuid) -> StrataResult<Self> {
        let uri = dir.join(&FileKind::Metadata.file_name(&id));
        let bytes = ark.read_immutable(&uri, CacheKind::Metadata)?;
        let rec = strata_zng::read_all(&TypeContext::new(), &bytes)?
            .into_iter()
            .next()
            .ok_or_else(|| strata_err!(Corruption: "empty chunk metadata {uri}"))?;
        let md = ChunkMetadata::from_value(&rec)
            .map_err(|e| e.with_context(format!("chunk metadata {uri}")))?;
        md.check_order(ark.data_order())
            .map_err(|e| e.with_context(format!("chunk metadata {uri}")))?;
        Ok(Self::new(dir.clone(), id, md))
    }

    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            first: self.first,
            last: self.last,
            record_count: self.record_count,
            masks: self.masks.clone(),
            size: self.size,
        }
    }

    pub fn path(&self, kind: FileKind) -> Uri {
        self.dir.join(&kind.file_name(&self.id))
    }

    /// The sidecar directory holding this chunk's secondary indexes.
    pub fn zar_dir(&self) -> Uri {
        self.dir
            .join(&format!("{}{SIDECAR_SUFFIX}", FileKind::Data.file_name(&self.id)))
    }

    /// Resolve a sidecar file name. [`DATA_FILE_ALIAS`] names the data file.
    pub fn localize(&self, name: &str) -> Uri {
        if name == DATA_FILE_ALIAS {
            self.path(FileKind::Data)
        } else {
            self.zar_dir().join(name)
        }
    }

    pub fn span(&self) -> Span {
        Span::from_first_last(self.first, self.last)
    }

    /// `first-last` as nanoseconds, the way chunks are listed.
    pub fn range(&self) -> String {
        format!("[{}-{}]", self.first.0, self.last.0)
    }

    /// Path of the data file relative to `root`.
    pub fn rel_path(&self, root: &Uri) -> String {
        root.rel_path(&self.path(FileKind::Data))
    }

    /// Chunk order: `(first, last, record_count, id)`, flipped for descending archives.
    pub fn compare(&self, other: &Chunk, order: Order) -> Ordering {
        let ord = self
            .first
            .cmp(&other.first)
            .then(self.last.cmp(&other.last))
            .then(self.record_count.cmp(&other.record_count))
            .then(self.id.cmp(&other.id));
        order.apply(ord)
    }

    /// Remove every file of the chunk. Deleting a chunk twice succeeds.
    pub fn delete(&self, ark: &Archive) -> StrataResult<()> {
        let mux = ark.mux();
        // A chunk without metadata is invisible to readers, so it goes first.
        for kind in [FileKind::Metadata, FileKind::Seek, FileKind::Data] {
            let uri = self.path(kind);
            ark.invalidate(&uri);
            mux.remove(&uri).ignore_not_found()?;
        }
        mux.remove_all(&self.zar_dir())
    }
}

impl Display for Chunk {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.id, self.range(), self.record_count)
    }
}

/// Reads the bytes of a chunk's data file that may hold records of a span.
pub struct ChunkReader {
    inner: LimitReader<Box<dyn IoReader>>,
    total_size: u64,
    read_size: u64,
}

impl ChunkReader {
    /// Open `chunk` narrowed to `read_span` with its seek index, if it has one.
    pub fn open(ark: &Archive, chunk: &Chunk, read_span: Span) -> StrataResult<Self> {
        let span = chunk.span();
        if !read_span.overlaps(&span) {
            strata_bail!(
                Invalid: "chunk span does not intersect readSpan: chunk {} {span}, read {read_span}",
                chunk.id
            );
        }
        let total_size = u64::try_from(chunk.size).unwrap_or_default();
        let range = if read_span.covers(&span) {
            crate::Range::all()
        } else {
            match ark.read_immutable(&chunk.path(FileKind::Seek), CacheKind::Index) {
                Ok(bytes) => SeekIndex::from_bytes(bytes)?.lookup(read_span),
                Err(e) if e.is_not_found() => crate::Range::all(),
                Err(e) => return Err(e),
            }
        };
        let mut reader = ark.mux().open_reader(&chunk.path(FileKind::Data))?;
        let start = range.start.min(total_size);
        if start > 0 {
            reader.seek(SeekFrom::Start(start))?;
        }
        let read_size = range.clipped_len(total_size);
        Ok(Self {
            inner: LimitReader::new(reader, read_size),
            total_size,
            read_size,
        })
    }

    /// Size of the whole data file.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes of the data file this reader covers.
    pub fn read_size(&self) -> u64 {
        self.read_size
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_chunk_file_names() {
        let id = Ksuid::new();
        assert_eq!(file_match(&format!("d-{id}.zng")), Some((FileKind::Data, id)));
        assert_eq!(file_match(&format!("m-{id}.zng")), Some((FileKind::Metadata, id)));
        assert_eq!(file_match(&format!("ts-{id}.zng")), Some((FileKind::Seek, id)));
        assert_eq!(file_match(&format!("x-{id}.zng")), None);
        assert_eq!(file_match(&format!("d-{id}.zng.zar")), None);
        assert_eq!(file_match("d-short.zng"), None);
    }

    #[test]
    fn metadata_record_round_trips() {
        let ctx = TypeContext::new();
        let md = ChunkMetadata {
            first: Ts(500),
            last: Ts(100),
            record_count: 7,
            masks: vec![Ksuid::new(), Ksuid::new()],
            size: 4096,
        };
        let back = ChunkMetadata::from_value(&md.to_value(&ctx).unwrap()).unwrap();
        assert_eq!(back, md);
        back.check_order(Order::Desc).unwrap();
        let err = back.check_order(Order::Asc).unwrap_err();
        assert_eq!(err.kind(), strata_error::ErrorKind::Corruption);
    }

    #[test]
    fn order_is_total_and_follows_archive_order() {
        let dir = Uri::parse("file:///lake/zd/20200101").unwrap();
        let chunk = |first: i64, last: i64, count: u64| {
            Chunk::new(
                dir.clone(),
                Ksuid::new(),
                ChunkMetadata {
                    first: Ts(first),
                    last: Ts(last),
                    record_count: count,
                    masks: Vec::new(),
                    size: 1,
                },
            )
        };
        let a = chunk(1, 5, 3);
        let b = chunk(1, 5, 4);
        let c = chunk(2, 3, 1);
        assert_eq!(a.compare(&b, Order::Asc), Ordering::Less);
        assert_eq!(b.compare(&c, Order::Asc), Ordering::Less);
        assert_eq!(a.compare(&b, Order::Desc), Ordering::Greater);
        assert_eq!(a.compare(&a, Order::Desc), Ordering::Equal);
        assert_eq!(a.span(), Span::new(Ts(1), Ts(6)));
        assert_eq!(a.localize("_"), a.path(FileKind::Data));
        assert_eq!(
            a.localize("idx.zng").to_string(),
            format!("file:///lake/zd/20200101/d-{}.zng.zar/idx.zng", a.id)
        );
    }
}
