//! Sparse `ts` to byte offset index over a chunk's data file.

use std::fmt::{Display, Formatter};

use bytes::Bytes;
use strata_error::{StrataResult, strata_bail, strata_err};
use strata_io::{Mux, Uri};
use strata_value::{FieldPath, Order, Span, Ts, TypeContext, Value};
use strata_zng::microindex::{Finder, IndexOptions, IndexWriter};

pub const SEEK_KEY: &str = "ts";
const OFFSET_FIELD: &str = "offset";

/// A byte range of a data file. `end` is [`Range::EOF`] when the range runs to the end.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Range {
    pub start: u64,
    pub end: u64,
}

impl Range {
    pub const EOF: u64 = u64::MAX;

    pub fn all() -> Self {
        Self {
            start: 0,
            end: Self::EOF,
        }
    }

    /// Length once clipped to a file of `size` bytes.
    pub fn clipped_len(&self, size: u64) -> u64 {
        self.end.min(size).saturating_sub(self.start)
    }
}

impl Display for Range {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.end == Self::EOF {
            write!(f, "[{}-EOF)", self.start)
        } else {
            write!(f, "[{}-{})", self.start, self.end)
        }
    }
}

/// Builds a seek index while a chunk is written.
///
/// An entry may only be entered at a stream boundary of the data file, and only when the
/// record starting there has a different `ts` than the record before it. Every record before
/// an entry then sorts strictly before the entry's `ts`.
pub struct SeekIndexWriter {
    inner: IndexWriter,
    ctx: TypeContext,
}

impl SeekIndexWriter {
    pub fn create(mux: &Mux, uri: Uri, order: Order) -> StrataResult<Self> {
        let inner = IndexWriter::create(
            mux,
            uri,
            IndexOptions {
                keys: vec![FieldPath::dotted(SEEK_KEY)],
                descending: order.is_desc(),
                ..Default::default()
            },
        )?;
        Ok(Self {
            inner,
            ctx: TypeContext::new(),
        })
    }

    pub fn enter(&mut self, ts: Ts, offset: u64) -> StrataResult<()> {
        let offset = i64::try_from(offset)
            .map_err(|_| strata_err!("seek offset {offset} out of range"))?;
        let rec = Value::record(
            &self.ctx,
            [(SEEK_KEY, Value::time(ts)), (OFFSET_FIELD, Value::int64(offset))],
        )?;
        self.inner.write(&rec)
    }

    pub fn close(self) -> StrataResult<()> {
        self.inner.close()
    }

    pub fn abort(self) -> StrataResult<()> {
        self.inner.abort()
    }
}

/// A loaded seek index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeekIndex {
    /// Entries in file order, which is the archive order.
    entries: Vec<(Ts, u64)>,
    order: Order,
}

impl SeekIndex {
    pub fn from_entries(entries: Vec<(Ts, u64)>, order: Order) -> Self {
        Self { entries, order }
    }

    pub fn from_bytes(bytes: Bytes) -> StrataResult<Self> {
        let finder = Finder::from_bytes(&TypeContext::new(), bytes)?;
        let order = if finder.trailer().descending {
            Order::Desc
        } else {
            Order::Asc
        };
        let entries = finder
            .entries()?
            .iter()
            .map(|rec| {
                let ts = rec.field(SEEK_KEY).and_then(|v| v.as_time());
                let off = rec
                    .field(OFFSET_FIELD)
                    .and_then(|v| v.as_int())
                    .and_then(|o| u64::try_from(o).ok());
                match (ts, off) {
                    (Some(ts), Some(off)) => Ok((ts, off)),
                    _ => strata_bail!(Corruption: "bad seek index entry {rec}"),
                }
            })
            .collect::<StrataResult<Vec<_>>>()?;
        Ok(Self { entries, order })
    }

    pub fn order(&self) -> Order {
        self.order
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The byte range holding every record whose `ts` falls in `span`.
    pub fn lookup(&self, span: Span) -> Range {
        let offset = |e: Option<&(Ts, u64)>| e.map(|(_, off)| *off);
        let (start, end) = match self.order {
            Order::Asc => (
                offset(self.entries.iter().rev().find(|(ts, _)| *ts <= span.begin)),
                offset(self.entries.iter().find(|(ts, _)| *ts >= span.end)),
            ),
            Order::Desc => {
                let last = span.last();
                (
                    offset(self.entries.iter().rev().find(|(ts, _)| *ts >= last)),
                    offset(self.entries.iter().find(|(ts, _)| *ts < span.begin)),
                )
            }
        };
        Range {
            start: start.unwrap_or(0),
            end: end.unwrap_or(Range::EOF),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn ascending() -> SeekIndex {
        SeekIndex::from_entries(
            vec![
                (Ts(100), 0),
                (Ts(200), 215_367),
                (Ts(300), 438_514),
                (Ts(400), 680_477),
                (Ts(500), 904_528),
            ],
            Order::Asc,
        )
    }

    #[rstest]
    #[case(300, 301, 438_514, 680_477)]
    #[case(250, 301, 215_367, 680_477)]
    #[case(0, 50, 0, 0)]
    #[case(100, 501, 0, Range::EOF)]
    #[case(450, 1000, 680_477, Range::EOF)]
    fn ascending_lookup(
        #[case] begin: i64,
        #[case] end: i64,
        #[case] start: u64,
        #[case] stop: u64,
    ) {
        let range = ascending().lookup(Span::new(Ts(begin), Ts(end)));
        assert_eq!(range, Range { start, end: stop });
    }

    #[rstest]
    #[case(300, 301, 438_514, 680_477)]
    #[case(350, 451, 0, 438_514)]
    #[case(100, 501, 0, Range::EOF)]
    fn descending_lookup(
        #[case] begin: i64,
        #[case] end: i64,
        #[case] start: u64,
        #[case] stop: u64,
    ) {
        let idx = SeekIndex::from_entries(
            vec![
                (Ts(500), 0),
                (Ts(400), 215_367),
                (Ts(300), 438_514),
                (Ts(200), 680_477),
                (Ts(100), 904_528),
            ],
            Order::Desc,
        );
        assert_eq!(idx.lookup(Span::new(Ts(begin), Ts(end))), Range { start, end: stop });
    }

    #[test]
    fn written_index_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let uri = Uri::from_path(&dir.path().join("ts.zng")).unwrap();
        let mux = Mux::default();
        let mut w = SeekIndexWriter::create(&mux, uri.clone(), Order::Desc).unwrap();
        w.enter(Ts(30), 0).unwrap();
        w.enter(Ts(20), 100).unwrap();
        w.enter(Ts(10), 200).unwrap();
        w.close().unwrap();

        let idx = SeekIndex::from_bytes(mux.read_all(&uri).unwrap()).unwrap();
        assert_eq!(idx.order(), Order::Desc);
        assert_eq!(idx.len(), 3);
        assert_eq!(
            idx.lookup(Span::new(Ts(20), Ts(21))),
            Range {
                start: 100,
                end: 200
            }
        );
    }
}
