//! The ingest path: chunk files and the day-partitioned archive writer.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use strata_error::{IgnoreNotFound, StrataError, StrataResult, strata_bail, strata_err};
use strata_expr::{Comparator, Evaluator};
use strata_io::{DirMaker, Mux, Source, Uri, Writer as IoWriter};
use strata_value::{Order, Span, Ts, TypeContext, Value};
use strata_zng::spill::MergeSort;
use strata_zng::{Writer as ZngWriter, WriterOptions, record_ts};

use crate::archive::DIR_MODE;
use crate::{Archive, Chunk, ChunkMetadata, FileKind, Ksuid, SeekIndexWriter};

/// Settings of the ingest path.
#[derive(Clone, Debug)]
pub struct ImportConfig {
    /// Records buffered in memory across all buckets before the largest bucket spills.
    pub import_buf_size: usize,
    /// Buckets untouched this long are flushed by the background flusher.
    pub stale_duration: Duration,
    pub stream_records_max: usize,
    pub frame_size: usize,
    pub compress: bool,
    /// Parent of spill directories, the system temp directory if unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            import_buf_size: 128 * 1024 * 1024,
            stale_duration: Duration::from_secs(5),
            stream_records_max: 5_000,
            frame_size: 512 * 1024,
            compress: true,
            temp_dir: None,
        }
    }
}

impl ImportConfig {
    fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            frame_size: self.frame_size,
            compress: self.compress,
            stream_records_max: Some(self.stream_records_max.max(1)),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub data_chunks_written: u64,
    pub record_bytes_written: u64,
    pub records_written: u64,
}

/// Writes one chunk: its data file, seek index and, on close, its metadata.
pub struct ChunkWriter {
    ark: Archive,
    dir: Uri,
    id: Ksuid,
    day: Span,
    masks: Vec<Ksuid>,
    data: Option<ZngWriter<Box<dyn IoWriter>>>,
    seek: Option<SeekIndexWriter>,
    first: Option<Ts>,
    last: Ts,
    record_count: u64,
    record_bytes: u64,
}

impl ChunkWriter {
    /// Start a chunk in the bucket of the day holding `ts`.
    pub fn create(ark: &Archive, ts: Ts, masks: Vec<Ksuid>, cfg: &ImportConfig) -> StrataResult<Self> {
        let dir = ark.bucket_dir(ts)?;
        let mux = ark.mux();
        mux.mkdir_all(&dir, DIR_MODE)?;
        let id = Ksuid::new();
        let data_uri = dir.join(&FileKind::Data.file_name(&id));
        let data = ZngWriter::new(mux.open_writer(&data_uri)?, cfg.writer_options());
        let seek = match SeekIndexWriter::create(
            mux,
            dir.join(&FileKind::Seek.file_name(&id)),
            ark.data_order(),
        ) {
            Ok(seek) => seek,
            Err(e) => {
                drop(data);
                remove_quietly(mux, &data_uri);
                return Err(e);
            }
        };
        Ok(Self {
            ark: ark.clone(),
            dir,
            id,
            day: Span::day_of(ts),
            masks,
            data: Some(data),
            seek: Some(seek),
            first: None,
            last: Ts(0),
            record_count: 0,
            record_bytes: 0,
        })
    }

    pub fn id(&self) -> Ksuid {
        self.id
    }

    /// Bytes written to the data file so far.
    pub fn position(&self) -> u64 {
        self.data.as_ref().map_or(0, ZngWriter::position)
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }

    pub fn write(&mut self, rec: &Value) -> StrataResult<()> {
        let ts = record_ts(rec);
        if !self.day.contains(ts) {
            strata_bail!(Invalid: "record at {ts} does not belong in bucket {}", self.dir);
        }
        let order = self.ark.data_order();
        if self.first.is_some() && order.apply(self.last.cmp(&ts)).is_gt() {
            strata_bail!(Invalid: "record at {ts} is out of {order} order after {}", self.last);
        }
        let (Some(data), Some(seek)) = (self.data.as_mut(), self.seek.as_mut()) else {
            strata_bail!("chunk writer {} is closed", self.id);
        };
        if data.at_stream_start() && (self.first.is_none() || self.last != ts) {
            seek.enter(ts, data.position())?;
        }
        data.write(rec)?;
        self.first.get_or_insert(ts);
        self.last = ts;
        self.record_count += 1;
        self.record_bytes += rec.size() as u64;
        Ok(())
    }

    fn finish(&mut self) -> StrataResult<Option<Chunk>> {
        let (Some(data), Some(seek)) = (self.data.take(), self.seek.take()) else {
            strata_bail!("chunk writer {} is closed", self.id);
        };
        let mut data = data;
        data.end_stream()?;
        let size = data.position();
        data.close()?.close()?;
        seek.close()?;
        let Some(first) = self.first else {
            return Ok(None);
        };
        let md = ChunkMetadata {
            first,
            last: self.last,
            record_count: self.record_count,
            masks: self.masks.clone(),
            size: i64::try_from(size).map_err(|_| strata_err!("chunk size {size} out of range"))?,
        };
        md.check_order(self.ark.data_order())?;
        let rec = md.to_value(&TypeContext::new())?;
        let uri = self.dir.join(&FileKind::Metadata.file_name(&self.id));
        self.ark
            .mux()
            .replace_all(&uri, &strata_zng::write_all(&[rec])?)?;
        Ok(Some(Chunk::new(self.dir.clone(), self.id, md)))
    }

    /// Finish the chunk and commit its metadata. A chunk with no records leaves nothing
    /// behind and yields `None`. On error every file of the chunk is removed.
    pub fn close(mut self) -> StrataResult<Option<Chunk>> {
        match self.finish() {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                self.remove_files();
                Ok(None)
            }
            Err(e) => {
                self.remove_files();
                Err(e)
            }
        }
    }

    /// Discard the chunk.
    pub fn abort(mut self) {
        self.data = None;
        if let Some(seek) = self.seek.take() {
            if let Err(e) = seek.abort() {
                log::warn!("aborting seek index of chunk {}: {e}", self.id);
            }
        }
        self.remove_files();
    }

    fn remove_files(&self) {
        let mux = self.ark.mux();
        for kind in [FileKind::Metadata, FileKind::Seek, FileKind::Data] {
            remove_quietly(mux, &self.dir.join(&kind.file_name(&self.id)));
        }
    }
}

fn remove_quietly(mux: &Mux, uri: &Uri) {
    if let Err(e) = mux.remove(uri).ignore_not_found() {
        log::warn!("removing {uri}: {e}");
    }
}

/// Sort key of the ingest path: the record's `ts`, the epoch when it has none.
#[derive(Debug)]
struct RecordTs;

impl Evaluator for RecordTs {
    fn eval_with(&self, _vars: &[Value], this: &Value) -> Value {
        Value::time(record_ts(this))
    }
}

fn ts_comparator(order: Order) -> Comparator {
    Comparator::for_sort(vec![Arc::new(RecordTs)], order, false)
}

struct Bucket {
    day: Ts,
    vals: Vec<Value>,
    buffered: usize,
    /// Bytes destined for the bucket's next chunk, spilled or not.
    estimate: usize,
    spill: Option<MergeSort>,
    last_write: Instant,
}

#[derive(Default)]
struct State {
    buckets: BTreeMap<Ts, Bucket>,
    mem_buffered: usize,
    stats: ImportStats,
    /// The first error of the background flusher, reported by the next call.
    err: Option<StrataError>,
}

struct Shared {
    ark: Archive,
    cfg: ImportConfig,
    ctx: TypeContext,
    state: Mutex<State>,
}

impl Shared {
    fn flush_bucket(&self, mut bucket: Bucket, stats: &mut ImportStats) -> StrataResult<()> {
        let cmp = ts_comparator(self.ark.data_order());
        let mut cw = ChunkWriter::create(&self.ark, bucket.day, Vec::new(), &self.cfg)?;
        let written = match bucket.spill.take() {
            Some(mut spill) => spill
                .spill(std::mem::take(&mut bucket.vals))
                .and_then(|()| spill.merge())
                .and_then(|merged| merged.into_iter().try_for_each(|rec| cw.write(&rec?))),
            None => {
                cmp.sort_stable(&mut bucket.vals);
                bucket.vals.iter().try_for_each(|rec| cw.write(rec))
            }
        };
        if let Err(e) = written {
            cw.abort();
            return Err(e);
        }
        let (count, bytes) = (cw.record_count(), cw.record_bytes);
        if let Some(chunk) = cw.close()? {
            log::debug!("flushed chunk {} with {count} records to {}", chunk.id, chunk.dir);
            stats.data_chunks_written += 1;
            stats.records_written += count;
            stats.record_bytes_written += bytes;
        }
        Ok(())
    }

    fn spill_largest(&self, state: &mut State) -> StrataResult<()> {
        let Some(bucket) = state
            .buckets
            .values_mut()
            .filter(|b| b.buffered > 0)
            .max_by_key(|b| b.buffered)
        else {
            return Ok(());
        };
        if bucket.spill.is_none() {
            bucket.spill = Some(MergeSort::new(
                ts_comparator(self.ark.data_order()),
                self.ctx.clone(),
                self.cfg.temp_dir.as_deref(),
            )?);
        }
        let vals = std::mem::take(&mut bucket.vals);
        if let Some(spill) = bucket.spill.as_mut() {
            spill.spill(vals)?;
        }
        log::debug!("spilled {} bytes of bucket {}", bucket.buffered, bucket.day);
        state.mem_buffered -= bucket.buffered;
        bucket.buffered = 0;
        Ok(())
    }

    fn flush_stale(&self) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let stale: Vec<Ts> = state
            .buckets
            .values()
            .filter(|b| b.last_write.elapsed() >= self.cfg.stale_duration)
            .map(|b| b.day)
            .collect();
        for day in stale {
            let Some(bucket) = state.buckets.remove(&day) else {
                continue;
            };
            log::debug!("flushing stale bucket {day}");
            state.mem_buffered -= bucket.buffered;
            if let Err(e) = self.flush_bucket(bucket, &mut state.stats) {
                log::warn!("stale flush of bucket {day}: {e}");
                state.err.get_or_insert(e);
            }
        }
    }
}

/// Partitions records by UTC day of `ts` and writes each day's records as sorted chunks.
///
/// A background thread flushes buckets that have not been written for
/// [`ImportConfig::stale_duration`] so that long-running imports become visible.
pub struct Writer {
    shared: Arc<Shared>,
    stop: Option<flume::Sender<()>>,
    flusher: Option<JoinHandle<()>>,
}

impl Writer {
    pub fn new(ark: &Archive, cfg: ImportConfig) -> StrataResult<Self> {
        let shared = Arc::new(Shared {
            ark: ark.clone(),
            cfg,
            ctx: TypeContext::new(),
            state: Mutex::new(State::default()),
        });
        let (stop, stopped) = flume::bounded::<()>(1);
        let period = shared.cfg.stale_duration.max(Duration::from_millis(1));
        let flusher = {
            let shared = shared.clone();
            std::thread::Builder::new()
                .name("strata-stale-flush".to_string())
                .spawn(move || {
                    while let Err(flume::RecvTimeoutError::Timeout) = stopped.recv_timeout(period) {
                        shared.flush_stale();
                    }
                })?
        };
        Ok(Self {
            shared,
            stop: Some(stop),
            flusher: Some(flusher),
        })
    }

    pub fn write(&self, rec: &Value) -> StrataResult<()> {
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if let Some(e) = state.err.take() {
            return Err(e);
        }
        let day = record_ts(rec).day_start();
        let rec = rec.keep();
        let size = rec.size();
        let bucket = state.buckets.entry(day).or_insert_with(|| Bucket {
            day,
            vals: Vec::new(),
            buffered: 0,
            estimate: 0,
            spill: None,
            last_write: Instant::now(),
        });
        bucket.vals.push(rec);
        bucket.buffered += size;
        bucket.estimate += size;
        bucket.last_write = Instant::now();
        state.mem_buffered += size;
        let threshold = usize::try_from(self.shared.ark.log_size_threshold()).unwrap_or(usize::MAX);
        if bucket.estimate > threshold {
            if let Some(bucket) = state.buckets.remove(&day) {
                state.mem_buffered -= bucket.buffered;
                self.shared.flush_bucket(bucket, &mut state.stats)?;
            }
        }
        while state.mem_buffered > self.shared.cfg.import_buf_size {
            self.shared.spill_largest(state)?;
        }
        Ok(())
    }

    pub fn stats(&self) -> ImportStats {
        self.shared.state.lock().stats
    }

    fn stop_flusher(&mut self) -> StrataResult<()> {
        self.stop.take();
        if let Some(handle) = self.flusher.take() {
            handle
                .join()
                .map_err(|_| strata_err!("stale flusher thread panicked"))?;
        }
        Ok(())
    }

    /// Stop the background flusher and flush every bucket.
    pub fn close(mut self) -> StrataResult<ImportStats> {
        self.stop_flusher()?;
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if let Some(e) = state.err.take() {
            return Err(e);
        }
        while let Some((_, bucket)) = state.buckets.pop_first() {
            state.mem_buffered -= bucket.buffered;
            self.shared.flush_bucket(bucket, &mut state.stats)?;
        }
        Ok(state.stats)
    }

    /// Stop the background flusher and discard every record not yet flushed. Chunks already
    /// flushed stay in the archive.
    pub fn abort(mut self) -> ImportStats {
        if let Err(e) = self.stop_flusher() {
            log::warn!("{e}");
        }
        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        let buckets = std::mem::take(&mut state.buckets);
        state.mem_buffered = 0;
        if !buckets.is_empty() {
            let bytes: usize = buckets.values().map(|b| b.estimate).sum();
            log::warn!(
                "import aborted: discarding {} unflushed buckets holding {bytes} bytes",
                buckets.len()
            );
        }
        state.stats
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if let Err(e) = self.stop_flusher() {
            log::warn!("{e}");
        }
    }
}

/// Write every record into `ark`.
pub fn import(
    ark: &Archive,
    cfg: ImportConfig,
    records: impl IntoIterator<Item = StrataResult<Value>>,
) -> StrataResult<ImportStats> {
    let w = Writer::new(ark, cfg)?;
    for rec in records {
        if let Err(err) = rec.and_then(|rec| w.write(&rec)) {
            w.abort();
            return Err(err);
        }
    }
    w.close()
}

#[cfg(test)]
mod tests {
    use strata_value::json;

    use super::*;
    use crate::{CacheKind, ChunkReader, CreateOptions, OpenOptions, SeekIndex};

    fn archive(order: Order, threshold: i64) -> (tempfile::TempDir, Archive) {
        let dir = tempfile::tempdir().unwrap();
        let root = Uri::from_path(dir.path()).unwrap();
        let ark = Archive::create_or_open(
            &Mux::default(),
            &root,
            &CreateOptions {
                data_order: Some(order),
                log_size_threshold: Some(threshold),
                ..Default::default()
            },
            &OpenOptions::default(),
        )
        .unwrap();
        (dir, ark)
    }

    fn rec(ctx: &TypeContext, ts: &str, n: i64) -> Value {
        json::parse(ctx, &format!(r#"{{"ts":"{ts}","n":{n}}}"#)).unwrap()
    }

    fn jsons<'a>(vals: impl IntoIterator<Item = &'a Value>) -> Vec<serde_json::Value> {
        vals.into_iter().map(|v| json::to_json(v).unwrap()).collect()
    }

    fn read_chunk(ark: &Archive, chunk: &Chunk, span: Span) -> Vec<Value> {
        let reader = ChunkReader::open(ark, chunk, span).unwrap();
        strata_zng::Reader::new(TypeContext::new(), reader)
            .map(Result::unwrap)
            .collect()
    }

    #[test]
    fn chunk_reads_back_in_written_order() {
        let (_dir, ark) = archive(Order::Asc, DEFAULT_THRESHOLD);
        let ctx = TypeContext::new();
        let cfg = ImportConfig {
            stream_records_max: 3,
            ..Default::default()
        };
        let base = Ts::parse("2020-01-01T00:00:00Z").unwrap();
        let vals: Vec<Value> = (0..20)
            .map(|i| {
                Value::record(&ctx, [("ts", Value::time(base.add(i / 2))), ("n", Value::int64(i))])
                    .unwrap()
            })
            .collect();
        let mut cw = ChunkWriter::create(&ark, base, Vec::new(), &cfg).unwrap();
        for v in &vals {
            cw.write(v).unwrap();
        }
        let chunk = cw.close().unwrap().unwrap();
        assert_eq!(chunk.record_count, 20);
        assert_eq!((chunk.first, chunk.last), (base, base.add(9)));

        let back = read_chunk(&ark, &chunk, chunk.span());
        assert_eq!(jsons(&back), jsons(&vals));

        // Seek entries only land where the ts changes across a stream boundary.
        let idx = SeekIndex::from_bytes(
            ark.read_immutable(&chunk.path(FileKind::Seek), CacheKind::Index)
                .unwrap(),
        )
        .unwrap();
        assert!(idx.len() > 1);
        let full = idx.lookup(chunk.span());
        assert_eq!(full.start, 0);
        assert!(full.end >= u64::try_from(chunk.size).unwrap());

        // A narrowed read still holds every record of the span.
        let span = Span::new(base.add(4), base.add(6));
        let narrowed = read_chunk(&ark, &chunk, span);
        let want = jsons(vals.iter().filter(|v| span.contains(record_ts(v))));
        let got = jsons(narrowed.iter().filter(|v| span.contains(record_ts(v))));
        assert_eq!(got, want);
        assert!(narrowed.len() < vals.len());
    }

    #[test]
    fn reader_rejects_disjoint_span() {
        let (_dir, ark) = archive(Order::Asc, DEFAULT_THRESHOLD);
        let ctx = TypeContext::new();
        let mut cw =
            ChunkWriter::create(&ark, Ts(100), Vec::new(), &ImportConfig::default()).unwrap();
        for ts in [100, 200, 300] {
            cw.write(&Value::record(&ctx, [("ts", Value::time(Ts(ts)))]).unwrap())
                .unwrap();
        }
        let chunk = cw.close().unwrap().unwrap();
        let err = ChunkReader::open(&ark, &chunk, Span::new(Ts(600), Ts(601)))
            .err()
            .unwrap();
        assert!(err.to_string().contains("chunk span does not intersect readSpan"));
    }

    #[test]
    fn out_of_order_records_are_rejected_and_nothing_is_left() {
        let (_dir, ark) = archive(Order::Desc, DEFAULT_THRESHOLD);
        let ctx = TypeContext::new();
        let mut cw =
            ChunkWriter::create(&ark, Ts(100), Vec::new(), &ImportConfig::default()).unwrap();
        let dir = ark.bucket_dir(Ts(100)).unwrap();
        cw.write(&Value::record(&ctx, [("ts", Value::time(Ts(100)))]).unwrap())
            .unwrap();
        let err = cw
            .write(&Value::record(&ctx, [("ts", Value::time(Ts(200)))]).unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), strata_error::ErrorKind::Invalid);
        cw.abort();
        assert!(ark.mux().read_dir(&dir).unwrap().is_empty());
    }

    const DEFAULT_THRESHOLD: i64 = 500 * 1024 * 1024;

    #[test]
    fn import_partitions_by_day_and_sorts() {
        let (_dir, ark) = archive(Order::Desc, DEFAULT_THRESHOLD);
        let ctx = TypeContext::new();
        let recs = vec![
            rec(&ctx, "2017-08-03T14:34:37.501001Z", 1),
            rec(&ctx, "2017-08-04T01:00:00Z", 2),
            rec(&ctx, "2017-08-03T14:34:40.988247Z", 3),
            rec(&ctx, "2017-08-03T14:34:37.471635Z", 4),
        ];
        let stats = import(&ark, ImportConfig::default(), recs.into_iter().map(Ok)).unwrap();
        assert_eq!(stats.data_chunks_written, 2);
        assert_eq!(stats.records_written, 4);

        let buckets = ark.buckets(Span::all()).unwrap();
        let names: Vec<&str> = buckets.iter().map(|(_, dir)| dir.base()).collect();
        assert_eq!(names, vec!["20170804", "20170803"]);

        let chunks = ark.bucket_chunks(&buckets[1].1).unwrap();
        assert_eq!(chunks.len(), 1);
        let ns: Vec<i64> = read_chunk(&ark, &chunks[0], chunks[0].span())
            .iter()
            .map(|v| v.field("n").unwrap().as_int().unwrap())
            .collect();
        assert_eq!(ns, vec![3, 1, 4]);
    }

    #[test]
    fn small_buffers_spill_and_thresholds_roll_chunks() {
        let (_dir, ark) = archive(Order::Asc, 2048);
        let ctx = TypeContext::new();
        let cfg = ImportConfig {
            import_buf_size: 512,
            ..Default::default()
        };
        let base = Ts::parse("2021-06-01T00:00:00Z").unwrap();
        let recs = (0..400).rev().map(|i| {
            Value::record(&ctx, [("ts", Value::time(base.add(i))), ("n", Value::int64(i))])
        });
        let stats = import(&ark, cfg, recs).unwrap();
        assert_eq!(stats.records_written, 400);
        assert!(stats.data_chunks_written > 1);

        let mut total = 0;
        ark.walk(|chunk| {
            let vals = read_chunk(&ark, chunk, chunk.span());
            let ts: Vec<Ts> = vals.iter().map(record_ts).collect();
            assert!(ts.windows(2).all(|w| w[0] <= w[1]));
            assert_eq!((ts[0], ts[ts.len() - 1]), (chunk.first, chunk.last));
            total += vals.len();
            Ok(())
        })
        .unwrap();
        assert_eq!(total, 400);
    }

    #[test]
    fn stale_buckets_flush_in_the_background() {
        let (_dir, ark) = archive(Order::Desc, DEFAULT_THRESHOLD);
        let ctx = TypeContext::new();
        let w = Writer::new(
            &ark,
            ImportConfig {
                stale_duration: Duration::from_millis(20),
                ..Default::default()
            },
        )
        .unwrap();
        w.write(&rec(&ctx, "2017-08-03T14:34:37.501001Z", 1)).unwrap();
        let deadline = Instant::now() + Duration::from_secs(10);
        while w.stats().data_chunks_written == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(w.stats().data_chunks_written, 1);
        assert_eq!(w.close().unwrap().records_written, 1);
    }

    #[test]
    fn deleting_a_chunk_is_idempotent() {
        let (_dir, ark) = archive(Order::Asc, DEFAULT_THRESHOLD);
        let ctx = TypeContext::new();
        let mut cw =
            ChunkWriter::create(&ark, Ts(5), Vec::new(), &ImportConfig::default()).unwrap();
        cw.write(&Value::record(&ctx, [("ts", Value::time(Ts(5)))]).unwrap())
            .unwrap();
        let chunk = cw.close().unwrap().unwrap();
        ark.walk(|_| Ok(())).unwrap();
        assert!(ark.mux().exists(&chunk.zar_dir()).unwrap());
        chunk.delete(&ark).unwrap();
        chunk.delete(&ark).unwrap();
        assert!(ark.mux().read_dir(&chunk.dir).unwrap().is_empty());
    }

    #[test]
    fn failed_imports_discard_unflushed_records() {
        let (_dir, ark) = archive(Order::Asc, DEFAULT_THRESHOLD);
        let ctx = TypeContext::new();
        let recs = vec![
            Ok(rec(&ctx, "2017-08-03T14:34:37.501001Z", 1)),
            Ok(rec(&ctx, "2017-08-04T14:34:37.501001Z", 2)),
            Err(strata_err!(Invalid: "bad input")),
        ];
        let err = import(&ark, ImportConfig::default(), recs).unwrap_err();
        assert_eq!(err.kind(), strata_error::ErrorKind::Invalid);
        let mut chunks = 0;
        ark.walk(|_| {
            chunks += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(chunks, 0);
        assert_eq!(ark.record_count().unwrap(), 0);
    }
}
