//! Nanosecond timestamps and half-open time spans.

use std::fmt::{Display, Formatter};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use strata_error::{StrataResult, strata_err};

const NANOS_PER_DAY: i64 = 86_400 * 1_000_000_000;

/// Nanoseconds since the Unix epoch.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Ts(pub i64);

impl Ts {
    pub const MIN: Ts = Ts(i64::MIN);
    pub const MAX: Ts = Ts(i64::MAX);

    pub fn nanos(self) -> i64 {
        self.0
    }

    /// Midnight UTC of the day containing this timestamp.
    pub fn day_start(self) -> Ts {
        Ts(self.0.div_euclid(NANOS_PER_DAY) * NANOS_PER_DAY)
    }

    pub fn add(self, nanos: i64) -> Ts {
        Ts(self.0.saturating_add(nanos))
    }

    pub fn timestamp(self) -> StrataResult<Timestamp> {
        Ok(Timestamp::from_nanosecond(i128::from(self.0))?)
    }

    /// Parse an RFC 3339 timestamp.
    pub fn parse(s: &str) -> StrataResult<Ts> {
        let ts: Timestamp = s
            .parse()
            .map_err(|e| strata_err!(Invalid: "bad timestamp {s}: {e}"))?;
        i64::try_from(ts.as_nanosecond())
            .map(Ts)
            .map_err(|_| strata_err!(Invalid: "timestamp out of range: {s}"))
    }
}

impl From<i64> for Ts {
    fn from(v: i64) -> Self {
        Ts(v)
    }
}

impl Display for Ts {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.timestamp() {
            Ok(ts) => Display::fmt(&ts, f),
            Err(_) => write!(f, "{}", self.0),
        }
    }
}

/// A half-open interval `[begin, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub begin: Ts,
    pub end: Ts,
}

impl Span {
    /// The span `[begin, end)`.
    pub fn new(begin: Ts, end: Ts) -> Self {
        Self { begin, end }
    }

    /// The span covering every representable timestamp.
    pub fn all() -> Self {
        Span::new(Ts::MIN, Ts::MAX)
    }

    /// The span from `first` to `last` inclusive, in either order.
    pub fn from_first_last(first: Ts, last: Ts) -> Self {
        let (lo, hi) = if first <= last {
            (first, last)
        } else {
            (last, first)
        };
        Span::new(lo, hi.add(1))
    }

    pub fn dur(&self) -> i64 {
        self.end.0.saturating_sub(self.begin.0)
    }

    /// The last timestamp inside the span.
    pub fn last(&self) -> Ts {
        self.end.add(-1)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    pub fn contains(&self, ts: Ts) -> bool {
        ts >= self.begin && ts < self.end
    }

    pub fn covers(&self, other: &Span) -> bool {
        other.begin >= self.begin && other.end <= self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.begin < other.end && other.begin < self.end
    }

    pub fn intersect(&self, other: &Span) -> Option<Span> {
        let begin = self.begin.max(other.begin);
        let end = self.end.min(other.end);
        (begin < end).then(|| Span::new(begin, end))
    }

    pub fn union(&self, other: &Span) -> Span {
        Span::new(self.begin.min(other.begin), self.end.max(other.end))
    }

    /// The UTC day containing `ts`.
    pub fn day_of(ts: Ts) -> Span {
        let begin = ts.day_start();
        Span::new(begin, begin.add(NANOS_PER_DAY))
    }
}

impl Display for Span {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}-{})", self.begin, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_last_ordering_is_irrelevant() {
        let a = Span::from_first_last(Ts(500), Ts(100));
        let b = Span::from_first_last(Ts(100), Ts(500));
        assert_eq!(a, b);
        assert_eq!(a.begin, Ts(100));
        assert_eq!(a.end, Ts(501));
        assert!(a.contains(Ts(500)));
        assert!(!a.contains(Ts(501)));
    }

    #[test]
    fn overlap_and_intersection() {
        let a = Span::new(Ts(0), Ts(10));
        let b = Span::new(Ts(5), Ts(20));
        let c = Span::new(Ts(10), Ts(20));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert_eq!(a.intersect(&b), Some(Span::new(Ts(5), Ts(10))));
        assert_eq!(a.intersect(&c), None);
        assert!(Span::all().covers(&a));
    }

    #[test]
    fn day_start_handles_negative() {
        assert_eq!(Ts(-1).day_start(), Ts(-NANOS_PER_DAY));
        let ts = Ts::parse("2017-08-03T14:34:40.988247Z").unwrap();
        assert_eq!(ts.day_start(), Ts::parse("2017-08-03T00:00:00Z").unwrap());
        assert_eq!(ts.to_string(), "2017-08-03T14:34:40.988247Z");
    }
}
