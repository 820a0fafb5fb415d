//! The entry points of a plan: file, HTTP and pool scans, partition listing and the
//! metadata scanners.

use std::collections::VecDeque;
use std::sync::Arc;

use strata_error::{StrataResult, strata_bail, strata_err};
use strata_expr::Expr;
use strata_io::ctxio::CancelReader;
use strata_io::{Reader as IoReader, Source, Uri};
use strata_lake::{
    Archive, Chunk, FileKind, MultiSource, RecordReader, SourceFilter, SpanInfo, SpanMultiSource,
    file_match,
};
use strata_value::{Span, Ts, Type, TypeContext, Value};
use strata_zng::{Reader, Scanner, ScannerStats};

use crate::index::{DefinitionStore, IndexFilter};
use crate::plan::Meta;
use crate::{Batch, BoxPuller, Context, Puller, ValuesPuller};

/// A scanner over one opened file.
struct FileReader {
    scanner: Scanner<CancelReader<Box<dyn IoReader>>>,
}

impl RecordReader for FileReader {
    fn read(&mut self) -> StrataResult<Option<Value>> {
        self.scanner.read()
    }

    fn stats(&self) -> ScannerStats {
        self.scanner.stats()
    }
}

/// Emits the records of a reader and folds its counters into the query's progress.
struct ReaderPuller {
    ctx: Arc<Context>,
    reader: Option<Box<dyn RecordReader>>,
}

impl ReaderPuller {
    fn new(ctx: Arc<Context>, reader: Box<dyn RecordReader>) -> Self {
        Self {
            ctx,
            reader: Some(reader),
        }
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            self.ctx.add_progress(reader.stats());
        }
    }
}

impl Puller for ReaderPuller {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if done {
            self.close();
            return Ok(None);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let n = self.ctx.batch_size();
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            match reader.read()? {
                Some(val) => out.push(val),
                None => break,
            }
        }
        if out.is_empty() {
            self.close();
            return Ok(None);
        }
        Ok(Some(Batch::new(out)))
    }
}

fn open_file(ctx: &Arc<Context>, uri: &Uri, filter: Option<&Expr>) -> StrataResult<BoxPuller> {
    let file = ctx.mux.open_reader(uri)?;
    let reader = Reader::new(ctx.zctx.clone(), CancelReader::new(file, ctx.cancel.clone()));
    let scanner = Scanner::new(reader, filter, None)?;
    Ok(Box::new(ReaderPuller::new(ctx.clone(), Box::new(FileReader { scanner }))))
}

/// Scan a record stream named by a URI.
pub fn file_scan(ctx: &Arc<Context>, uri: &str, filter: Option<&Expr>) -> StrataResult<BoxPuller> {
    open_file(ctx, &Uri::parse(uri)?, filter)
}

/// Scan a record stream served over HTTP. The mux must have a source for the URL's scheme.
pub fn http_scan(ctx: &Arc<Context>, url: &str, filter: Option<&Expr>) -> StrataResult<BoxPuller> {
    let uri = Uri::parse(url)?;
    if !matches!(uri.scheme(), "http" | "https") {
        strata_bail!(Invalid: "not an http or https URL: {url}");
    }
    open_file(ctx, &uri, filter)
}

/// Reads every source of a multisource in turn.
struct MultiSourcePuller<M: MultiSource> {
    ctx: Arc<Context>,
    ms: M,
    sources: VecDeque<M::Source>,
    filter: SourceFilter,
    current: Option<ReaderPuller>,
}

impl<M: MultiSource> MultiSourcePuller<M> {
    fn new(ctx: Arc<Context>, ms: M, sources: Vec<M::Source>, filter: SourceFilter) -> Self {
        Self {
            ctx,
            ms,
            sources: sources.into(),
            filter,
            current: None,
        }
    }
}

impl<M: MultiSource> Puller for MultiSourcePuller<M> {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if done {
            self.sources.clear();
            if let Some(mut cur) = self.current.take() {
                cur.pull(true)?;
            }
            return Ok(None);
        }
        loop {
            if let Some(cur) = self.current.as_mut() {
                if let Some(batch) = cur.pull(false)? {
                    return Ok(Some(batch));
                }
                self.current = None;
            }
            let Some(src) = self.sources.pop_front() else {
                return Ok(None);
            };
            self.ctx.cancel.check()?;
            let reader = self.ms.open(&self.ctx.zctx, &src, &self.filter, &self.ctx.cancel)?;
            self.current = Some(ReaderPuller::new(self.ctx.clone(), reader));
        }
    }
}

/// The span multisource of a pool, with index pruning when the filter allows it.
fn span_source(ark: &Archive, filter: Option<&Expr>) -> StrataResult<SpanMultiSource> {
    let ms = SpanMultiSource::new(ark.clone());
    let Some(filter) = filter else {
        return Ok(ms);
    };
    let defs = DefinitionStore::new(ark).list()?;
    Ok(match IndexFilter::new(&defs, filter) {
        Some(pushdown) => ms.with_chunk_filter(Arc::new(pushdown)),
        None => ms,
    })
}

/// Scan a pool's records in archive order.
pub fn pool_scan(
    ctx: &Arc<Context>,
    pool: &str,
    span: Option<Span>,
    filter: Option<&Expr>,
) -> StrataResult<BoxPuller> {
    let ark = ctx.lake()?.open_pool(pool)?;
    let ms = span_source(&ark, filter)?;
    let span = span.unwrap_or_else(Span::all);
    let sources = ms.sources(span)?;
    log::debug!("scanning pool {pool}: {} spans", sources.len());
    let filter = SourceFilter {
        filter: filter.cloned(),
        span,
    };
    Ok(Box::new(MultiSourcePuller::new(ctx.clone(), ms, sources, filter)))
}

/// A partition as a record: `{first, last, chunks}` with chunk data paths relative to the
/// pool's data directory.
fn partition_value(ctx: &TypeContext, ark: &Archive, si: &SpanInfo) -> StrataResult<Value> {
    let (first, last) = si.first_last(ark.data_order());
    let data_dir = ark.data_dir();
    let chunks: Vec<Value> = si
        .chunks
        .iter()
        .map(|c| Value::string(&c.rel_path(&data_dir)))
        .collect();
    Value::record(
        ctx,
        [
            ("first", Value::time(first)),
            ("last", Value::time(last)),
            ("chunks", Value::array(ctx, &Type::STRING, &chunks)?),
        ],
    )
}

fn partition_span(val: &Value) -> StrataResult<(Ts, Ts)> {
    let first = val.field("first").and_then(|v| v.as_time());
    let last = val.field("last").and_then(|v| v.as_time());
    match (first, last) {
        (Some(first), Some(last)) => Ok((first, last)),
        _ => strata_bail!(Invalid: "not a partition: {val}"),
    }
}

/// Rebuild the span and chunks of a partition record.
fn partition_info(ark: &Archive, val: &Value) -> StrataResult<SpanInfo> {
    let (first, last) = partition_span(val)?;
    let paths = val
        .field("chunks")
        .ok_or_else(|| strata_err!(Invalid: "partition has no chunks: {val}"))?
        .elements()?;
    let data_dir = ark.data_dir();
    let mut chunks = Vec::with_capacity(paths.len());
    for path in &paths {
        let path = path
            .as_str()
            .ok_or_else(|| strata_err!(Invalid: "bad chunk path in partition: {val}"))?;
        let (bucket, name) = path
            .rsplit_once('/')
            .ok_or_else(|| strata_err!(Invalid: "bad chunk path '{path}'"))?;
        let Some((FileKind::Data, id)) = file_match(name) else {
            strata_bail!(Invalid: "bad chunk path '{path}'");
        };
        match Chunk::open(ark, &data_dir.join(bucket), id) {
            Ok(chunk) => chunks.push(chunk),
            Err(e) if e.is_not_found() => log::info!("chunk {id} vanished, skipping"),
            Err(e) => return Err(e),
        }
    }
    Ok(SpanInfo {
        span: Span::from_first_last(first, last),
        chunks,
    })
}

fn values(ctx: &Context, vals: Vec<Value>) -> BoxPuller {
    Box::new(ValuesPuller::new(vals, ctx.batch_size()))
}

/// List the partitions of a pool overlapping `span`.
pub fn lister(ctx: &Arc<Context>, pool: &str, span: Option<Span>) -> StrataResult<BoxPuller> {
    let ark = ctx.lake()?.open_pool(pool)?;
    let parts = ark
        .spans(span.unwrap_or_else(Span::all))?
        .iter()
        .map(|si| partition_value(&ctx.zctx, &ark, si))
        .collect::<StrataResult<Vec<_>>>()?;
    Ok(values(ctx, parts))
}

/// Clips partitions to a span, dropping those outside it.
pub struct Slicer {
    parent: BoxPuller,
    ctx: TypeContext,
    span: Span,
}

impl Slicer {
    pub fn new(parent: BoxPuller, ctx: &TypeContext, span: Span) -> Self {
        Self {
            parent,
            ctx: ctx.clone(),
            span,
        }
    }

    fn slice(&self, val: &Value) -> StrataResult<Option<Value>> {
        let (first, last) = partition_span(val)?;
        let Some(clipped) = Span::from_first_last(first, last).intersect(&self.span) else {
            return Ok(None);
        };
        let (first, last) = if first <= last {
            (clipped.begin, clipped.last())
        } else {
            (clipped.last(), clipped.begin)
        };
        let chunks = val
            .field("chunks")
            .ok_or_else(|| strata_err!(Invalid: "partition has no chunks: {val}"))?;
        Value::record(
            &self.ctx,
            [
                ("first", Value::time(first)),
                ("last", Value::time(last)),
                ("chunks", chunks),
            ],
        )
        .map(Some)
    }
}

impl Puller for Slicer {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if done {
            return self.parent.pull(true).map(|_| None);
        }
        while let Some(batch) = self.parent.pull(false)? {
            let mut out = Vec::with_capacity(batch.len());
            for val in batch.iter() {
                if let Some(v) = self.slice(val)? {
                    out.push(v);
                }
            }
            if !out.is_empty() {
                return Ok(Some(Batch::new(out)));
            }
        }
        Ok(None)
    }
}

/// Scans each partition read from its parent, one after the other.
pub struct SeqScan {
    parent: BoxPuller,
    ctx: Arc<Context>,
    ark: Archive,
    ms: SpanMultiSource,
    filter: SourceFilter,
    current: Option<ReaderPuller>,
    pending: VecDeque<Value>,
    parent_eos: bool,
}

impl SeqScan {
    pub fn new(
        parent: BoxPuller,
        ctx: &Arc<Context>,
        pool: &str,
        filter: Option<&Expr>,
    ) -> StrataResult<Self> {
        let ark = ctx.lake()?.open_pool(pool)?;
        let ms = span_source(&ark, filter)?;
        Ok(Self {
            parent,
            ctx: ctx.clone(),
            ark,
            ms,
            filter: SourceFilter {
                filter: filter.cloned(),
                span: Span::all(),
            },
            current: None,
            pending: VecDeque::new(),
            parent_eos: false,
        })
    }

    fn next_partition(&mut self) -> StrataResult<Option<Value>> {
        loop {
            if let Some(val) = self.pending.pop_front() {
                return Ok(Some(val));
            }
            if self.parent_eos {
                return Ok(None);
            }
            match self.parent.pull(false)? {
                Some(batch) => self.pending.extend(batch.iter().cloned()),
                None => self.parent_eos = true,
            }
        }
    }
}

impl Puller for SeqScan {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if done {
            self.pending.clear();
            if let Some(mut cur) = self.current.take() {
                cur.pull(true)?;
            }
            if !self.parent_eos {
                self.parent_eos = true;
                self.parent.pull(true)?;
            }
            return Ok(None);
        }
        loop {
            if let Some(cur) = self.current.as_mut() {
                if let Some(batch) = cur.pull(false)? {
                    return Ok(Some(batch));
                }
                self.current = None;
            }
            let Some(part) = self.next_partition()? else {
                return Ok(None);
            };
            let si = partition_info(&self.ark, &part)?;
            let reader = self.ms.open(&self.ctx.zctx, &si, &self.filter, &self.ctx.cancel)?;
            self.current = Some(ReaderPuller::new(self.ctx.clone(), reader));
        }
    }
}

fn chunk_value(ctx: &TypeContext, ark: &Archive, chunk: &Chunk) -> StrataResult<Value> {
    let masks: Vec<Value> = chunk.masks.iter().map(|m| Value::string(&m.to_string())).collect();
    Value::record(
        ctx,
        [
            ("id", Value::string(&chunk.id.to_string())),
            ("path", Value::string(&chunk.rel_path(&ark.data_dir()))),
            ("first", Value::time(chunk.first)),
            ("last", Value::time(chunk.last)),
            ("record_count", Value::uint64(chunk.record_count)),
            ("size", Value::int64(chunk.size)),
            ("masks", Value::array(ctx, &Type::STRING, &masks)?),
        ],
    )
}

fn meta_values(ctx: &Context, meta: Meta, pool: Option<&str>) -> StrataResult<Vec<Value>> {
    let lake = ctx.lake()?;
    let mctx = &ctx.mctx;
    if meta == Meta::Pools {
        return lake
            .pools()?
            .iter()
            .map(|name| Value::record(mctx, [("name", Value::string(name))]))
            .collect();
    }
    let Some(pool) = pool else {
        strata_bail!(Invalid: "{} scan needs a pool", meta.name());
    };
    let ark = lake.open_pool(pool)?;
    match meta {
        Meta::Pools => Ok(Vec::new()),
        Meta::Chunks => {
            let mut out = Vec::new();
            for (_, dir) in ark.buckets(Span::all())? {
                for chunk in ark.bucket_chunks(&dir)? {
                    out.push(chunk_value(mctx, &ark, &chunk)?);
                }
            }
            Ok(out)
        }
        Meta::Indexes => DefinitionStore::new(&ark)
            .list()?
            .iter()
            .map(|def| def.to_value(mctx))
            .collect(),
        Meta::Stats => ark.stat(mctx),
    }
}

/// Describe the lake: its pools, or a pool's chunks, index definitions or file stats.
/// Records are built in the metadata type context and handed over to the query's.
pub fn meta_scan(ctx: &Arc<Context>, meta: Meta, pool: Option<&str>) -> StrataResult<BoxPuller> {
    let vals = meta_values(ctx, meta, pool)?
        .iter()
        .map(|v| ctx.zctx.translate(v))
        .collect::<StrataResult<Vec<_>>>()?;
    Ok(values(ctx, vals))
}

impl Meta {
    pub fn name(self) -> &'static str {
        match self {
            Meta::Pools => "pools",
            Meta::Chunks => "chunks",
            Meta::Indexes => "indexes",
            Meta::Stats => "stats",
        }
    }
}
