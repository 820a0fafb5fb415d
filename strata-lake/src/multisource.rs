//! Sources of records for query scans: one per span of overlapping chunks, or one per chunk.

use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use strata_error::StrataResult;
use strata_expr::Expr;
use strata_io::ctxio::CancelReader;
use strata_io::{CancelToken, Reader as IoReader, Source};
use strata_value::{FieldPath, Order, Span, TypeContext, Value};
use strata_zng::{Reader, Scanner, ScannerStats, record_ts};

use crate::{Archive, Chunk, ChunkReader, SpanInfo};

/// Decides before a chunk is opened whether it can hold matching records.
pub trait ChunkFilter: Debug + Send + Sync {
    fn keep(&self, ark: &Archive, chunk: &Chunk) -> StrataResult<bool>;
}

/// Byte counts of chunk reads, shared by every source of a multisource.
#[derive(Debug, Default)]
pub struct ChunkStats {
    opened_bytes: AtomicU64,
    read_bytes: AtomicU64,
}

impl ChunkStats {
    /// Total size of the data files opened.
    pub fn chunks_opened_bytes(&self) -> u64 {
        self.opened_bytes.load(Ordering::Relaxed)
    }

    /// Bytes of the opened data files left after seek-index narrowing.
    pub fn chunks_read_bytes(&self) -> u64 {
        self.read_bytes.load(Ordering::Relaxed)
    }

    fn record(&self, reader: &ChunkReader) {
        self.opened_bytes
            .fetch_add(reader.total_size(), Ordering::Relaxed);
        self.read_bytes.fetch_add(reader.read_size(), Ordering::Relaxed);
    }
}

/// The filter pushed into scanners.
#[derive(Clone, Debug)]
pub struct SourceFilter {
    pub filter: Option<Expr>,
    pub span: Span,
}

impl Default for SourceFilter {
    fn default() -> Self {
        Self {
            filter: None,
            span: Span::all(),
        }
    }
}

/// The sort order of a source's output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderInfo {
    pub key: FieldPath,
    pub order: Order,
}

/// A stream of records opened from a multisource.
pub trait RecordReader: Send {
    fn read(&mut self) -> StrataResult<Option<Value>>;

    fn stats(&self) -> ScannerStats;
}

/// Splits an archive into independently readable sources.
pub trait MultiSource: Send + Sync {
    type Source: Clone + Debug + Send;

    /// The order records of each source come out in, if any.
    fn order_info(&self) -> Option<OrderInfo>;

    fn sources(&self, span: Span) -> StrataResult<Vec<Self::Source>>;

    fn open(
        &self,
        ctx: &TypeContext,
        src: &Self::Source,
        filter: &SourceFilter,
        cancel: &CancelToken,
    ) -> StrataResult<Box<dyn RecordReader>>;
}

/// One source per [`SpanInfo`], merging its chunks by `ts` in archive order.
#[derive(Clone)]
pub struct SpanMultiSource {
    ark: Archive,
    stats: Arc<ChunkStats>,
    chunk_filter: Option<Arc<dyn ChunkFilter>>,
}

impl SpanMultiSource {
    pub fn new(ark: Archive) -> Self {
        Self {
            ark,
            stats: Arc::default(),
            chunk_filter: None,
        }
    }

    pub fn with_chunk_filter(mut self, filter: Arc<dyn ChunkFilter>) -> Self {
        self.chunk_filter = Some(filter);
        self
    }

    pub fn stats(&self) -> &Arc<ChunkStats> {
        &self.stats
    }
}

impl MultiSource for SpanMultiSource {
    type Source = SpanInfo;

    fn order_info(&self) -> Option<OrderInfo> {
        Some(OrderInfo {
            key: FieldPath::dotted("ts"),
            order: self.ark.data_order(),
        })
    }

    fn sources(&self, span: Span) -> StrataResult<Vec<SpanInfo>> {
        self.ark.spans(span)
    }

    fn open(
        &self,
        ctx: &TypeContext,
        si: &SpanInfo,
        filter: &SourceFilter,
        cancel: &CancelToken,
    ) -> StrataResult<Box<dyn RecordReader>> {
        let Some(span) = si.span.intersect(&filter.span) else {
            return Ok(Box::new(SpanScanner::new(Vec::new(), self.ark.data_order())));
        };
        let mut scanners = Vec::with_capacity(si.chunks.len());
        for chunk in &si.chunks {
            if let Some(cf) = &self.chunk_filter {
                if !cf.keep(&self.ark, chunk)? {
                    log::debug!("chunk {} pruned by index", chunk.id);
                    continue;
                }
            }
            let reader = match ChunkReader::open(&self.ark, chunk, span) {
                Ok(reader) => reader,
                Err(e) if e.is_not_found() => {
                    log::info!("chunk {} vanished during scan, skipping", chunk.id);
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.stats.record(&reader);
            let reader = Reader::new(ctx.clone(), CancelReader::new(reader, cancel.clone()));
            scanners.push(Scanner::new(reader, filter.filter.as_ref(), Some(span))?);
        }
        Ok(Box::new(SpanScanner::new(scanners, self.ark.data_order())))
    }
}

type ChunkScanner = Scanner<CancelReader<ChunkReader>>;

/// Merges per-chunk scanners by record `ts`. Equal timestamps come out in chunk order.
pub struct SpanScanner {
    scanners: Vec<ChunkScanner>,
    heads: Vec<Option<Value>>,
    order: Order,
    primed: bool,
}

impl SpanScanner {
    fn new(scanners: Vec<ChunkScanner>, order: Order) -> Self {
        Self {
            heads: vec![None; scanners.len()],
            scanners,
            order,
            primed: false,
        }
    }

    fn prime(&mut self) -> StrataResult<()> {
        for (head, scanner) in self.heads.iter_mut().zip(self.scanners.iter_mut()) {
            *head = scanner.read()?;
        }
        self.primed = true;
        Ok(())
    }
}

impl RecordReader for SpanScanner {
    fn read(&mut self) -> StrataResult<Option<Value>> {
        if !self.primed {
            self.prime()?;
        }
        let mut best: Option<usize> = None;
        for (i, head) in self.heads.iter().enumerate() {
            let Some(val) = head else {
                continue;
            };
            let better = best
                .and_then(|b| self.heads[b].as_ref())
                .is_none_or(|cur| self.order.apply(record_ts(val).cmp(&record_ts(cur))).is_lt());
            if better {
                best = Some(i);
            }
        }
        let Some(i) = best else {
            return Ok(None);
        };
        let next = self.scanners[i].read()?;
        Ok(std::mem::replace(&mut self.heads[i], next))
    }

    fn stats(&self) -> ScannerStats {
        let mut stats = ScannerStats::default();
        for scanner in &self.scanners {
            stats += scanner.stats();
        }
        stats
    }
}

/// One source per chunk, reading the data file or the named sidecar files in turn.
///
/// `_` in the alternate paths names the data file itself.
#[derive(Clone)]
pub struct ChunkMultiSource {
    ark: Archive,
    alt_paths: Vec<String>,
}

impl ChunkMultiSource {
    pub fn new(ark: Archive, alt_paths: Vec<String>) -> Self {
        Self { ark, alt_paths }
    }
}

impl MultiSource for ChunkMultiSource {
    type Source = Chunk;

    fn order_info(&self) -> Option<OrderInfo> {
        None
    }

    fn sources(&self, span: Span) -> StrataResult<Vec<Chunk>> {
        let mut chunks = Vec::new();
        self.ark.walk(|chunk| {
            if span.overlaps(&chunk.span()) {
                chunks.push(chunk.clone());
            }
            Ok(())
        })?;
        Ok(chunks)
    }

    fn open(
        &self,
        ctx: &TypeContext,
        chunk: &Chunk,
        filter: &SourceFilter,
        cancel: &CancelToken,
    ) -> StrataResult<Box<dyn RecordReader>> {
        let paths = if self.alt_paths.is_empty() {
            vec![crate::DATA_FILE_ALIAS.to_string()]
        } else {
            self.alt_paths.clone()
        };
        Ok(Box::new(PathsScanner {
            ark: self.ark.clone(),
            chunk: chunk.clone(),
            paths: paths.into_iter().rev().collect(),
            ctx: ctx.clone(),
            filter: filter.filter.clone(),
            cancel: cancel.clone(),
            current: None,
            stats: ScannerStats::default(),
        }))
    }
}

/// Reads a chunk's files one after the other.
struct PathsScanner {
    ark: Archive,
    chunk: Chunk,
    /// Files left to read, last first.
    paths: Vec<String>,
    ctx: TypeContext,
    filter: Option<Expr>,
    cancel: CancelToken,
    current: Option<Scanner<CancelReader<Box<dyn IoReader>>>>,
    stats: ScannerStats,
}

impl PathsScanner {
    fn open_next(&mut self) -> StrataResult<bool> {
        while let Some(path) = self.paths.pop() {
            let uri = self.chunk.localize(&path);
            let reader = match self.ark.mux().open_reader(&uri) {
                Ok(reader) => reader,
                Err(e) if e.is_not_found() => {
                    log::info!("{uri} not found, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let reader = Reader::new(self.ctx.clone(), CancelReader::new(reader, self.cancel.clone()));
            self.current = Some(Scanner::new(reader, self.filter.as_ref(), None)?);
            return Ok(true);
        }
        Ok(false)
    }
}

impl RecordReader for PathsScanner {
    fn read(&mut self) -> StrataResult<Option<Value>> {
        loop {
            if let Some(scanner) = self.current.as_mut() {
                if let Some(val) = scanner.read()? {
                    return Ok(Some(val));
                }
                self.stats += scanner.stats();
                self.current = None;
            }
            if !self.open_next()? {
                return Ok(None);
            }
        }
    }

    fn stats(&self) -> ScannerStats {
        let mut stats = self.stats;
        if let Some(scanner) = &self.current {
            stats += scanner.stats();
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use strata_io::{Mux, Uri};
    use strata_value::Ts;

    use super::*;
    use crate::{ChunkWriter, CreateOptions, ImportConfig, OpenOptions};

    fn ts(s: &str) -> Ts {
        Ts::parse(s).unwrap()
    }

    fn desc_archive() -> (tempfile::TempDir, Archive) {
        let dir = tempfile::tempdir().unwrap();
        let ark = Archive::create_or_open(
            &Mux::default(),
            &Uri::from_path(dir.path()).unwrap(),
            &CreateOptions::default(),
            &OpenOptions::default(),
        )
        .unwrap();
        (dir, ark)
    }

    fn write_chunk(ark: &Archive, recs: &[(&str, &str)]) -> Chunk {
        let ctx = TypeContext::new();
        let mut cw =
            ChunkWriter::create(ark, ts(recs[0].0), Vec::new(), &ImportConfig::default()).unwrap();
        for (t, uid) in recs {
            let rec =
                Value::record(&ctx, [("ts", Value::time(ts(t))), ("uid", Value::string(uid))])
                    .unwrap();
            cw.write(&rec).unwrap();
        }
        cw.close().unwrap().unwrap()
    }

    fn drain(mut reader: Box<dyn RecordReader>) -> Vec<Value> {
        let mut out = Vec::new();
        while let Some(val) = reader.read().unwrap() {
            out.push(val);
        }
        out
    }

    #[test]
    fn span_merges_chunks_in_archive_order() {
        let (_dir, ark) = desc_archive();
        write_chunk(
            &ark,
            &[
                ("2017-08-03T14:34:40.988247Z", "x"),
                ("2017-08-03T14:34:37.501001Z", "y"),
            ],
        );
        write_chunk(
            &ark,
            &[
                ("2017-08-03T14:34:40.988247Z", "z"),
                ("2017-08-03T14:34:37.471635Z", "w"),
            ],
        );
        let ms = SpanMultiSource::new(ark);
        assert_eq!(ms.order_info().unwrap().order, Order::Desc);
        let ctx = TypeContext::new();
        let cancel = CancelToken::new();
        let mut got = Vec::new();
        for si in ms.sources(Span::all()).unwrap() {
            let reader = ms.open(&ctx, &si, &SourceFilter::default(), &cancel).unwrap();
            got.extend(drain(reader).iter().map(record_ts));
        }
        assert_eq!(
            got,
            vec![
                ts("2017-08-03T14:34:40.988247Z"),
                ts("2017-08-03T14:34:40.988247Z"),
                ts("2017-08-03T14:34:37.501001Z"),
                ts("2017-08-03T14:34:37.471635Z"),
            ]
        );
        assert!(ms.stats().chunks_opened_bytes() > 0);
    }

    #[derive(Debug)]
    struct RejectAll;

    impl ChunkFilter for RejectAll {
        fn keep(&self, _ark: &Archive, _chunk: &Chunk) -> StrataResult<bool> {
            Ok(false)
        }
    }

    #[test]
    fn pruned_chunks_are_never_opened() {
        let (_dir, ark) = desc_archive();
        write_chunk(&ark, &[("2017-08-03T14:34:40Z", "x")]);
        let ms = SpanMultiSource::new(ark).with_chunk_filter(Arc::new(RejectAll));
        let ctx = TypeContext::new();
        for si in ms.sources(Span::all()).unwrap() {
            let reader = ms
                .open(&ctx, &si, &SourceFilter::default(), &CancelToken::new())
                .unwrap();
            assert!(drain(reader).is_empty());
        }
        assert_eq!(ms.stats().chunks_opened_bytes(), 0);
    }

    #[test]
    fn vanished_chunks_are_skipped() {
        let (_dir, ark) = desc_archive();
        let a = write_chunk(&ark, &[("2017-08-03T14:34:40Z", "x")]);
        let b = write_chunk(&ark, &[("2017-08-03T14:34:41Z", "y")]);
        let ms = SpanMultiSource::new(ark.clone());
        let sources = ms.sources(Span::all()).unwrap();
        ark.mux().remove(&a.path(crate::FileKind::Data)).unwrap();
        let mut uids = Vec::new();
        for si in &sources {
            let reader = ms
                .open(&TypeContext::new(), si, &SourceFilter::default(), &CancelToken::new())
                .unwrap();
            uids.extend(
                drain(reader)
                    .iter()
                    .map(|v| v.field("uid").unwrap().as_str().unwrap().to_string()),
            );
        }
        assert_eq!(uids, vec!["y"]);
        assert_eq!(ms.stats().chunks_opened_bytes(), u64::try_from(b.size).unwrap());
    }

    #[test]
    fn chunk_source_reads_data_and_sidecars() {
        let (_dir, ark) = desc_archive();
        let chunk = write_chunk(&ark, &[("2017-08-03T14:34:40Z", "x")]);
        ark.walk(|_| Ok(())).unwrap();
        let ctx = TypeContext::new();
        let side = Value::record(&ctx, [("key", Value::int64(7))]).unwrap();
        ark.mux()
            .write_all(&chunk.localize("extra.zng"), &strata_zng::write_all(&[side]).unwrap())
            .unwrap();

        let ms = ChunkMultiSource::new(
            ark,
            vec![crate::DATA_FILE_ALIAS.to_string(), "missing.zng".to_string(), "extra.zng".to_string()],
        );
        assert!(ms.order_info().is_none());
        let sources = ms.sources(Span::all()).unwrap();
        assert_eq!(sources, vec![chunk]);
        let vals = drain(
            ms.open(&ctx, &sources[0], &SourceFilter::default(), &CancelToken::new())
                .unwrap(),
        );
        assert_eq!(vals.len(), 2);
        assert_eq!(vals[1].field("key").unwrap().as_int(), Some(7));
    }
}
