#![deny(missing_docs)]
//! Strata metrics

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

use witchcraft_metrics::{Metric, MetricRegistry, Metrics, MetricsIter};
// re-export exposed metric types
pub use witchcraft_metrics::{Counter, Histogram, MetricId, Timer};

/// A shareable registry of counters and timers for one lake, query or import.
///
/// Cloning yields a handle onto the same registry. Metric names are dotted strings rooted at
/// `strata.`, for example `strata.lake.cache.metadata.hits`.
#[derive(Clone, Default)]
pub struct StrataMetrics {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    registry: MetricRegistry,
    default_tags: DefaultTags,
}

/// Tags attached to every metric reported from a [`StrataMetrics`] snapshot.
#[derive(Default, Clone)]
pub struct DefaultTags(BTreeMap<Cow<'static, str>, Cow<'static, str>>);

impl<K, V> From<&[(K, V)]> for DefaultTags
where
    K: Clone + Into<Cow<'static, str>>,
    V: Clone + Into<Cow<'static, str>>,
{
    fn from(pairs: &[(K, V)]) -> Self {
        DefaultTags(
            pairs
                .iter()
                .map(|(k, v)| (k.clone().into(), v.clone().into()))
                .collect(),
        )
    }
}

impl StrataMetrics {
    /// Create an empty registry whose snapshots carry `default_tags`.
    pub fn default_with_tags(default_tags: impl Into<DefaultTags>) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry: MetricRegistry::default(),
                default_tags: default_tags.into(),
            }),
        }
    }

    /// Returns the counter with the specified ID, creating a default instance if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a counter.
    pub fn counter<T>(&self, id: T) -> Arc<Counter>
    where
        T: Into<MetricId>,
    {
        self.inner.registry.counter(id)
    }

    /// Returns the timer with the specified ID, creating a default instance if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a timer.
    pub fn timer<T>(&self, id: T) -> Arc<Timer>
    where
        T: Into<MetricId>,
    {
        self.inner.registry.timer(id)
    }

    /// Returns the histogram with the specified ID, creating a default instance if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a histogram.
    pub fn histogram<T>(&self, id: T) -> Arc<Histogram>
    where
        T: Into<MetricId>,
    {
        self.inner.registry.histogram(id)
    }

    /// Current value of the named counter, or zero if it was never created.
    pub fn counter_value(&self, name: &str) -> i64 {
        self.metrics()
            .iter()
            .find_map(|(id, metric)| match metric {
                Metric::Counter(c) if id.name() == name => Some(c.count()),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Returns a snapshot of the metrics in the registry.
    ///
    /// Note: Tag values may contain sensitive information and should be properly sanitized before external exposure.
    pub fn metrics(&self) -> MetricsSnapshot<'_> {
        MetricsSnapshot {
            snapshot: self.inner.registry.metrics(),
            default_tags: &self.inner.default_tags,
        }
    }
}

/// A snapshot of the metrics in a registry with default tags.
pub struct MetricsSnapshot<'a> {
    snapshot: Metrics,
    default_tags: &'a DefaultTags,
}

impl MetricsSnapshot<'_> {
    /// Create an iterator over the metrics snapshot.
    pub fn iter(&self) -> StrataMetricsIter<'_> {
        StrataMetricsIter {
            iter: self.snapshot.iter(),
            default_tags: self.default_tags,
        }
    }
}

/// Metrics iterator that applies the default tags to each metric.
pub struct StrataMetricsIter<'a> {
    iter: MetricsIter<'a>,
    default_tags: &'a DefaultTags,
}

impl<'a> Iterator for StrataMetricsIter<'a> {
    type Item = (MetricId, &'a Metric);

    #[inline]
    fn next(&mut self) -> Option<(MetricId, &'a Metric)> {
        self.iter.next().map(|(k, v)| {
            let mut metric_id = k.clone();
            for (tag_key, tag_value) in self.default_tags.0.iter() {
                metric_id = metric_id.with_tag(tag_key.clone(), tag_value.clone())
            }
            (metric_id, v)
        })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_shared_between_clones() {
        let metrics = StrataMetrics::default_with_tags([("pool", "logs")].as_slice());
        let other = metrics.clone();
        metrics.counter("strata.test.hits").inc();
        other.counter("strata.test.hits").add(2);
        assert_eq!(metrics.counter_value("strata.test.hits"), 3);
        assert_eq!(metrics.counter_value("strata.test.misses"), 0);
    }

    #[test]
    fn snapshot_applies_default_tags() {
        let metrics = StrataMetrics::default_with_tags([("pool", "logs")].as_slice());
        metrics.counter("strata.test.hits").inc();
        let snapshot = metrics.metrics();
        let (id, _) = snapshot.iter().next().unwrap();
        assert_eq!(id.name(), "strata.test.hits");
        assert_eq!(snapshot.iter().count(), 1);
    }
}
