use std::fmt::{Display, Formatter};
use std::sync::Arc;

use bytes::Bytes;
use moka::sync::{Cache, CacheBuilder};
use rustc_hash::FxBuildHasher;
use strata_error::StrataResult;
use strata_io::{Mux, Uri};
use strata_metrics::{Counter, StrataMetrics};

/// The kinds of immutable files read through the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheKind {
    /// Chunk metadata sidecars.
    Metadata,
    /// Seek indexes and secondary indexes.
    Index,
}

impl Display for CacheKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CacheKind::Metadata => "metadata",
            CacheKind::Index => "index",
        })
    }
}

struct KindCounters {
    hits: Arc<Counter>,
    misses: Arc<Counter>,
}

impl KindCounters {
    fn new(metrics: &StrataMetrics, kind: CacheKind) -> Self {
        Self {
            hits: metrics.counter(format!("strata.lake.cache.{kind}.hits")),
            misses: metrics.counter(format!("strata.lake.cache.{kind}.misses")),
        }
    }
}

/// An entry-bounded cache of small files that never change once written, keyed by URI.
#[derive(Clone)]
pub struct ImmutableCache {
    cache: Cache<Uri, Bytes, FxBuildHasher>,
    counters: Arc<[KindCounters; 2]>,
}

impl ImmutableCache {
    pub fn new(max_entries: u64, metrics: &StrataMetrics) -> Self {
        Self {
            cache: CacheBuilder::new(max_entries)
                .name("strata-immutable-cache")
                .build_with_hasher(FxBuildHasher),
            counters: Arc::new([
                KindCounters::new(metrics, CacheKind::Metadata),
                KindCounters::new(metrics, CacheKind::Index),
            ]),
        }
    }

    /// Read `uri` through the cache. Errors are not cached.
    pub fn read(&self, mux: &Mux, uri: &Uri, kind: CacheKind) -> StrataResult<Bytes> {
        let counters = &self.counters[kind as usize];
        if let Some(bytes) = self.cache.get(uri) {
            counters.hits.inc();
            return Ok(bytes);
        }
        counters.misses.inc();
        let bytes = mux.read_all(uri)?;
        self.cache.insert(uri.clone(), bytes.clone());
        Ok(bytes)
    }

    /// Drop a cached file, used when a chunk is deleted.
    pub fn invalidate(&self, uri: &Uri) {
        self.cache.invalidate(uri);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_hits_and_misses_per_kind() {
        let dir = tempfile::tempdir().unwrap();
        let uri = Uri::from_path(&dir.path().join("m.zng")).unwrap();
        let mux = Mux::default();
        mux.write_all(&uri, b"abc").unwrap();

        let metrics = StrataMetrics::default();
        let cache = ImmutableCache::new(16, &metrics);
        for _ in 0..3 {
            assert_eq!(cache.read(&mux, &uri, CacheKind::Metadata).unwrap(), &b"abc"[..]);
        }
        assert_eq!(metrics.counter_value("strata.lake.cache.metadata.misses"), 1);
        assert_eq!(metrics.counter_value("strata.lake.cache.metadata.hits"), 2);
        assert_eq!(metrics.counter_value("strata.lake.cache.index.hits"), 0);

        let missing = Uri::from_path(&dir.path().join("none.zng")).unwrap();
        assert!(cache.read(&mux, &missing, CacheKind::Index).unwrap_err().is_not_found());
    }
}
