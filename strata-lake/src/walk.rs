//! Walking the per-day buckets of an archive and grouping their chunks into spans.

use std::collections::{HashMap, HashSet};

use jiff::civil::Date;
use jiff::tz::TimeZone;
use strata_error::StrataResult;
use strata_io::{DirMaker, Source, Uri};
use strata_value::{Order, Span, Ts};

use crate::archive::DIR_MODE;
use crate::{Archive, Chunk, FileKind, Ksuid, file_match};

/// The bucket directory name of the day holding `ts`, `YYYYMMDD`.
pub fn bucket_name(ts: Ts) -> StrataResult<String> {
    Ok(ts.day_start().timestamp()?.strftime("%Y%m%d").to_string())
}

/// The day a bucket directory covers.
pub fn parse_bucket_name(name: &str) -> Option<Span> {
    if name.len() != 8 || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let date = Date::strptime("%Y%m%d", name).ok()?;
    let nanos = date.to_zoned(TimeZone::UTC).ok()?.timestamp().as_nanosecond();
    i64::try_from(nanos).ok().map(|n| Span::day_of(Ts(n)))
}

/// A span and every chunk that may hold records inside it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpanInfo {
    pub span: Span,
    pub chunks: Vec<Chunk>,
}

impl SpanInfo {
    /// `(first, last)` of the span in archive order.
    pub fn first_last(&self, order: Order) -> (Ts, Ts) {
        match order {
            Order::Asc => (self.span.begin, self.span.last()),
            Order::Desc => (self.span.last(), self.span.begin),
        }
    }
}

fn next_ts(ts: Ts, order: Order) -> Ts {
    match order {
        Order::Asc => ts.add(1),
        Order::Desc => ts.add(-1),
    }
}

fn prev_ts(ts: Ts, order: Order) -> Ts {
    next_ts(ts, order.reverse())
}

fn sort_chunks(chunks: &mut [Chunk], order: Order) {
    chunks.sort_by(|a, b| a.compare(b, order));
}

/// Call `f` with each timestamp that is the first or last of some chunks, in `order`, along
/// with the chunks starting and ending there.
fn boundaries(chunks: &[Chunk], order: Order, mut f: impl FnMut(Ts, &[&Chunk], &[&Chunk])) {
    let mut points: Vec<(Ts, bool, usize)> = chunks
        .iter()
        .enumerate()
        .flat_map(|(idx, c)| [(c.first, true, idx), (c.last, false, idx)])
        .collect();
    points.sort_by(|a, b| order.apply(a.0.cmp(&b.0)));
    let mut firsts = Vec::with_capacity(chunks.len());
    let mut lasts = Vec::with_capacity(chunks.len());
    for group in points.chunk_by(|a, b| a.0 == b.0) {
        firsts.clear();
        lasts.clear();
        for (_, is_first, idx) in group {
            if *is_first {
                firsts.push(&chunks[*idx]);
            } else {
                lasts.push(&chunks[*idx]);
            }
        }
        f(group[0].0, &firsts, &lasts);
    }
}

/// Cut the timeline at every chunk boundary: each resulting span has a fixed set of active
/// chunks. Spans are clipped to `filter` and dropped when they miss it.
pub fn align_chunks_to_spans(chunks: &[Chunk], order: Order, filter: Span) -> Vec<SpanInfo> {
    let mut active: Vec<Chunk> = Vec::new();
    let mut first = Ts(0);
    let mut out = Vec::new();
    let emit = |active: &[Chunk], span: Span, out: &mut Vec<SpanInfo>| {
        if let Some(span) = filter.intersect(&span) {
            let mut chunks = active.to_vec();
            sort_chunks(&mut chunks, order);
            out.push(SpanInfo { span, chunks });
        }
    };
    boundaries(chunks, order, |ts, firsts, lasts| {
        if !firsts.is_empty() {
            if !active.is_empty() && ts != first {
                emit(&active, Span::from_first_last(first, prev_ts(ts, order)), &mut out);
            }
            active.extend(firsts.iter().map(|c| (*c).clone()));
            first = ts;
        }
        if !lasts.is_empty() {
            emit(&active, Span::from_first_last(first, ts), &mut out);
            active.retain(|c| !lasts.iter().any(|l| l.id == c.id));
            first = next_ts(ts, order);
        }
    });
    out
}

/// Drop chunks masked by another chunk of the same span. Returns the chunks that were masked
/// and no longer appear in any span.
pub fn remove_masked_chunks(spans: &mut [SpanInfo]) -> Vec<Chunk> {
    let mut masked: HashMap<Ksuid, Chunk> = HashMap::new();
    for si in spans.iter_mut() {
        if si.chunks.len() < 2 {
            continue;
        }
        let masks: HashSet<Ksuid> = si
            .chunks
            .iter()
            .flat_map(|c| c.masks.iter().copied())
            .collect();
        if masks.is_empty() {
            continue;
        }
        si.chunks.retain(|c| {
            if masks.contains(&c.id) {
                masked.insert(c.id, c.clone());
                false
            } else {
                true
            }
        });
    }
    let mut out: Vec<Chunk> = masked
        .into_values()
        .filter(|c| !spans.iter().any(|si| si.chunks.iter().any(|o| o.id == c.id)))
        .collect();
    out.sort_by_key(|c| c.id);
    out
}

fn largest_chunk(si: &SpanInfo) -> Option<Ksuid> {
    si.chunks
        .iter()
        .reduce(|best, c| if c.record_count > best.record_count { c } else { best })
        .map(|c| c.id)
}

/// Fold `si` into `into`: the union of their spans and their chunks.
fn absorb_span_info(into: &mut SpanInfo, si: SpanInfo, order: Order) {
    into.span = into.span.union(&si.span);
    for c in si.chunks {
        if !into.chunks.iter().any(|m| m.id == c.id) {
            into.chunks.push(c);
        }
    }
    sort_chunks(&mut into.chunks, order);
}

/// Merge neighbouring spans whose largest chunk is the same one, so a big chunk overlapped
/// by small ones is read in one pass.
pub fn merge_largest_chunk_span_infos(spans: Vec<SpanInfo>, order: Order) -> Vec<SpanInfo> {
    let mut out: Vec<SpanInfo> = Vec::with_capacity(spans.len());
    let mut run_largest = None;
    for si in spans {
        let largest = largest_chunk(&si);
        match out.last_mut() {
            Some(prev) if largest == run_largest => absorb_span_info(prev, si, order),
            _ => out.push(si),
        }
        run_largest = largest;
    }
    out
}

/// Group chunks into the ordered, non-overlapping spans a reader visits.
pub fn merge_chunks_to_spans(chunks: &[Chunk], order: Order, filter: Span) -> Vec<SpanInfo> {
    let mut spans = align_chunks_to_spans(chunks, order, filter);
    remove_masked_chunks(&mut spans);
    spans.retain(|si| !si.chunks.is_empty());
    merge_largest_chunk_span_infos(spans, order)
}

impl Archive {
    /// The directory of the bucket holding `ts`.
    pub fn bucket_dir(&self, ts: Ts) -> StrataResult<Uri> {
        Ok(self.data_dir().join(&bucket_name(ts)?))
    }

    /// Buckets overlapping `filter`, in archive order.
    pub fn buckets(&self, filter: Span) -> StrataResult<Vec<(Span, Uri)>> {
        let data_dir = self.data_dir();
        let entries = match self.mux().read_dir(&data_dir) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut buckets: Vec<(Span, Uri)> = entries
            .iter()
            .filter(|e| e.is_dir)
            .filter_map(|e| parse_bucket_name(&e.name).map(|day| (day, data_dir.join(&e.name))))
            .filter(|(day, _)| day.overlaps(&filter))
            .collect();
        let order = self.data_order();
        buckets.sort_by(|a, b| order.apply(a.0.begin.cmp(&b.0.begin)));
        Ok(buckets)
    }

    /// The chunks of a bucket admitted by the log filter, in archive order. A chunk is
    /// present once its metadata is written.
    pub fn bucket_chunks(&self, dir: &Uri) -> StrataResult<Vec<Chunk>> {
        let entries = match self.mux().read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut chunks = Vec::new();
        for entry in entries {
            let Some((FileKind::Metadata, id)) = file_match(&entry.name) else {
                continue;
            };
            if !self.is_allowed(&id) {
                continue;
            }
            match Chunk::open(self, dir, id) {
                Ok(chunk) => chunks.push(chunk),
                // Deleted while we were listing.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        sort_chunks(&mut chunks, self.data_order());
        Ok(chunks)
    }

    /// Visit every chunk in archive order, creating its sidecar directory first.
    pub fn walk(&self, mut f: impl FnMut(&Chunk) -> StrataResult<()>) -> StrataResult<()> {
        for (_, dir) in self.buckets(Span::all())? {
            for chunk in self.bucket_chunks(&dir)? {
                self.mux().mkdir_all(&chunk.zar_dir(), DIR_MODE)?;
                f(&chunk)?;
            }
        }
        Ok(())
    }

    /// Visit the spans of every bucket overlapping `filter`, in archive order.
    pub fn span_walk(
        &self,
        filter: Span,
        mut f: impl FnMut(SpanInfo) -> StrataResult<()>,
    ) -> StrataResult<()> {
        for (_, dir) in self.buckets(filter)? {
            let chunks = self.bucket_chunks(&dir)?;
            for si in merge_chunks_to_spans(&chunks, self.data_order(), filter) {
                f(si)?;
            }
        }
        Ok(())
    }

    /// Every span overlapping `filter`, in archive order.
    pub fn spans(&self, filter: Span) -> StrataResult<Vec<SpanInfo>> {
        let mut out = Vec::new();
        self.span_walk(filter, |si| {
            out.push(si);
            Ok(())
        })?;
        Ok(out)
    }

    /// Delete chunks that are fully masked by other chunks. Returns how many were removed.
    pub fn purge_masked(&self) -> StrataResult<usize> {
        let mut purged = 0;
        for (_, dir) in self.buckets(Span::all())? {
            let chunks = self.bucket_chunks(&dir)?;
            let mut spans = align_chunks_to_spans(&chunks, self.data_order(), Span::all());
            for chunk in remove_masked_chunks(&mut spans) {
                log::debug!("purging masked chunk {}", chunk.id);
                chunk.delete(self)?;
                purged += 1;
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::ChunkMetadata;

    fn chunk(first: i64, last: i64, count: u64) -> Chunk {
        Chunk::new(
            Uri::parse("file:///lake/zd/19700101").unwrap(),
            Ksuid::new(),
            ChunkMetadata {
                first: Ts(first),
                last: Ts(last),
                record_count: count,
                masks: Vec::new(),
                size: 1,
            },
        )
    }

    fn spans_of(sis: &[SpanInfo]) -> Vec<(i64, i64, usize)> {
        sis.iter()
            .map(|si| (si.span.begin.0, si.span.end.0, si.chunks.len()))
            .collect()
    }

    #[test]
    fn bucket_names_are_utc_days() {
        let ts = Ts::parse("2017-08-03T14:34:40.988247Z").unwrap();
        assert_eq!(bucket_name(ts).unwrap(), "20170803");
        let day = parse_bucket_name("20170803").unwrap();
        assert!(day.contains(ts));
        assert_eq!(day, Span::day_of(ts));
        assert_eq!(parse_bucket_name("2017083"), None);
        assert_eq!(parse_bucket_name("20171340"), None);
    }

    #[test]
    fn overlapping_chunks_split_at_boundaries() {
        let chunks = vec![chunk(0, 10, 5), chunk(5, 15, 5)];
        let spans = align_chunks_to_spans(&chunks, Order::Asc, Span::all());
        assert_eq!(spans_of(&spans), vec![(0, 5, 1), (5, 11, 2), (11, 16, 1)]);
    }

    #[test]
    fn descending_spans_run_backwards() {
        let chunks = vec![chunk(10, 0, 5), chunk(15, 5, 5)];
        let spans = align_chunks_to_spans(&chunks, Order::Desc, Span::all());
        assert_eq!(spans_of(&spans), vec![(11, 16, 1), (5, 11, 2), (0, 5, 1)]);
    }

    #[rstest]
    #[case(Span::new(Ts(6), Ts(8)), vec![(6, 8, 2)])]
    #[case(Span::new(Ts(12), Ts(100)), vec![(12, 16, 1)])]
    #[case(Span::new(Ts(20), Ts(30)), vec![])]
    fn spans_are_clipped_to_the_filter(
        #[case] filter: Span,
        #[case] expected: Vec<(i64, i64, usize)>,
    ) {
        let chunks = vec![chunk(0, 10, 5), chunk(5, 15, 5)];
        let spans = align_chunks_to_spans(&chunks, Order::Asc, filter);
        assert_eq!(spans_of(&spans), expected);
    }

    #[test]
    fn masked_chunks_are_removed_and_reported() {
        let old = chunk(0, 10, 5);
        let mut new = chunk(0, 10, 5);
        new.masks = vec![old.id];
        let mut spans = align_chunks_to_spans(&[old.clone(), new.clone()], Order::Asc, Span::all());
        let masked = remove_masked_chunks(&mut spans);
        assert_eq!(masked, vec![old]);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].chunks, vec![new]);
    }

    #[test]
    fn spans_sharing_a_largest_chunk_merge() {
        let big = chunk(0, 100, 1000);
        let small = chunk(40, 60, 3);
        let spans = merge_chunks_to_spans(&[big, small], Order::Asc, Span::all());
        assert_eq!(spans_of(&spans), vec![(0, 101, 2)]);

        let apart = merge_chunks_to_spans(&[chunk(0, 10, 1), chunk(20, 30, 1)], Order::Asc, Span::all());
        assert_eq!(spans_of(&apart), vec![(0, 11, 1), (20, 31, 1)]);
    }
}
