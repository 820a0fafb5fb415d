use std::collections::VecDeque;
use std::io::Read;
use std::ops::AddAssign;

use strata_error::StrataResult;
use strata_expr::bufferfilter::BufferFilter;
use strata_expr::{Expr, ExprEvaluator, compile, matches};
use strata_value::{Span, Ts, Value};

use crate::Reader;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScannerStats {
    /// Uncompressed bytes of values frames read.
    pub bytes_read: u64,
    /// Body bytes of records that passed every filter.
    pub bytes_matched: u64,
    /// Records decoded and evaluated.
    pub records_read: u64,
    pub records_matched: u64,
}

impl AddAssign for ScannerStats {
    fn add_assign(&mut self, rhs: Self) {
        self.bytes_read += rhs.bytes_read;
        self.bytes_matched += rhs.bytes_matched;
        self.records_read += rhs.records_read;
        self.records_matched += rhs.records_matched;
    }
}

/// The `ts` of a record, with records lacking one placed at the epoch.
pub fn record_ts(val: &Value) -> Ts {
    val.field("ts").and_then(|ts| ts.as_time()).unwrap_or(Ts(0))
}

/// Reads a stream and yields the records that pass a filter and fall in a span.
///
/// Each values frame is first checked with the buffer prefilter derived from the filter
/// expression; frames it rejects are never decoded.
pub struct Scanner<R> {
    reader: Reader<R>,
    filter: Option<ExprEvaluator>,
    prefilter: Option<BufferFilter>,
    span: Option<Span>,
    pending: VecDeque<Value>,
    stats: ScannerStats,
}

impl<R: Read> Scanner<R> {
    pub fn new(reader: Reader<R>, filter: Option<&Expr>, span: Option<Span>) -> StrataResult<Self> {
        let (filter, prefilter) = match filter {
            Some(expr) => (
                Some(compile(reader.context(), expr)?),
                BufferFilter::compile(expr),
            ),
            None => (None, None),
        };
        Ok(Self {
            reader,
            filter,
            prefilter,
            span,
            pending: VecDeque::new(),
            stats: ScannerStats::default(),
        })
    }

    pub fn read(&mut self) -> StrataResult<Option<Value>> {
        loop {
            if let Some(val) = self.pending.pop_front() {
                return Ok(Some(val));
            }
            let Some(frame) = self.reader.read_values_frame()? else {
                return Ok(None);
            };
            self.stats.bytes_read += frame.len() as u64;
            if let Some(bf) = &self.prefilter {
                if !bf.eval(&frame, self.reader.type_defs()) {
                    continue;
                }
            }
            for val in self.reader.decode_frame(&frame)? {
                self.stats.records_read += 1;
                if let Some(span) = &self.span {
                    if !span.contains(record_ts(&val)) {
                        continue;
                    }
                }
                if let Some(filter) = &self.filter {
                    if !matches(filter.as_ref(), &val) {
                        continue;
                    }
                }
                self.stats.records_matched += 1;
                self.stats.bytes_matched += val.size() as u64;
                self.pending.push_back(val);
            }
        }
    }

    pub fn stats(&self) -> ScannerStats {
        self.stats
    }

    /// Bytes consumed from the underlying input.
    pub fn position(&self) -> u64 {
        self.reader.position()
    }
}

impl<R: Read> Iterator for Scanner<R> {
    type Item = StrataResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read().transpose()
    }
}
