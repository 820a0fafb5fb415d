use std::collections::VecDeque;

use strata_error::StrataResult;
use strata_value::Value;

use crate::{Batch, BoxPuller, Puller};

/// Passes on the first `limit` values, then tells its parent it is done. A limit of zero
/// counts as one.
pub struct Head {
    parent: BoxPuller,
    limit: usize,
    count: usize,
    eos: bool,
}

impl Head {
    pub fn new(parent: BoxPuller, limit: usize) -> Self {
        Self {
            parent,
            limit: limit.max(1),
            count: 0,
            eos: false,
        }
    }
}

impl Puller for Head {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.eos {
            return Ok(None);
        }
        if done {
            self.eos = true;
            return self.parent.pull(true).map(|_| None);
        }
        let Some(batch) = self.parent.pull(false)? else {
            self.eos = true;
            return Ok(None);
        };
        let remaining = self.limit - self.count;
        if batch.len() < remaining {
            self.count += batch.len();
            return Ok(Some(batch));
        }
        self.count = self.limit;
        self.eos = true;
        self.parent.pull(true)?;
        if batch.len() == remaining {
            return Ok(Some(batch));
        }
        Ok(Some(Batch::new(batch[..remaining].to_vec())))
    }
}

/// Emits the last `limit` values of its input, in arrival order, as one batch. A limit of
/// zero counts as one.
pub struct Tail {
    parent: BoxPuller,
    limit: usize,
    buf: VecDeque<Value>,
    eos: bool,
}

impl Tail {
    pub fn new(parent: BoxPuller, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            parent,
            limit,
            buf: VecDeque::with_capacity(limit),
            eos: false,
        }
    }
}

impl Puller for Tail {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.eos {
            return Ok(None);
        }
        self.eos = true;
        if done {
            self.buf.clear();
            return self.parent.pull(true).map(|_| None);
        }
        while let Some(batch) = self.parent.pull(false)? {
            for val in batch.iter() {
                if self.buf.len() == self.limit {
                    self.buf.pop_front();
                }
                self.buf.push_back(val.keep());
            }
        }
        if self.buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(Batch::new(self.buf.drain(..).collect())))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::{ValuesPuller, collect};

    /// Records whether it was told it is done.
    struct Watched {
        inner: ValuesPuller,
        done: Arc<AtomicBool>,
    }

    impl Puller for Watched {
        fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
            if done {
                self.done.store(true, Ordering::SeqCst);
            }
            self.inner.pull(done)
        }
    }

    fn ints(n: i64) -> Vec<Value> {
        (1..=n).map(Value::int64).collect()
    }

    fn as_ints(vals: &[Value]) -> Vec<i64> {
        vals.iter().map(|v| v.as_int().unwrap()).collect()
    }

    #[test]
    fn head_stops_its_parent_at_the_limit() {
        let done = Arc::new(AtomicBool::new(false));
        let parent = Watched {
            inner: ValuesPuller::new(ints(4), 100),
            done: done.clone(),
        };
        let mut head = Head::new(Box::new(parent), 2);
        let batch = head.pull(false).unwrap().unwrap();
        assert_eq!(as_ints(&batch), vec![1, 2]);
        assert!(done.load(Ordering::SeqCst));
        assert!(head.pull(false).unwrap().is_none());
    }

    #[test]
    fn head_spans_batches() {
        let mut head = Head::new(Box::new(ValuesPuller::new(ints(10), 3)), 5);
        assert_eq!(as_ints(&collect(&mut head).unwrap()), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn tail_keeps_the_last_values() {
        let mut tail = Tail::new(Box::new(ValuesPuller::new(ints(10), 3)), 4);
        assert_eq!(as_ints(&collect(&mut tail).unwrap()), vec![7, 8, 9, 10]);
        let mut empty = Tail::new(Box::new(ValuesPuller::new(Vec::new(), 3)), 4);
        assert!(empty.pull(false).unwrap().is_none());
    }

    #[test]
    fn zero_limits_keep_one_value() {
        let mut head = Head::new(Box::new(ValuesPuller::new(ints(5), 2)), 0);
        let batch = head.pull(false).unwrap().unwrap();
        assert_eq!(as_ints(&batch), vec![1]);
        assert!(head.pull(false).unwrap().is_none());

        let mut tail = Tail::new(Box::new(ValuesPuller::new(ints(5), 2)), 0);
        assert_eq!(as_ints(&collect(&mut tail).unwrap()), vec![5]);
    }

    #[test]
    fn done_before_the_limit_reaches_the_parent() {
        let done = Arc::new(AtomicBool::new(false));
        let parent = Watched {
            inner: ValuesPuller::new(ints(4), 1),
            done: done.clone(),
        };
        let mut tail = Tail::new(Box::new(parent), 2);
        assert!(tail.pull(true).unwrap().is_none());
        assert!(done.load(Ordering::SeqCst));
        assert!(tail.pull(false).unwrap().is_none());
    }
}
