use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use strata_error::StrataResult;
use strata_expr::{Comparator, ExprEvaluator, dot_evaluator, guess_sort_key};
use strata_value::{Order, Value};

use crate::{Batch, BoxPuller, Puller};

/// A kept value. The heap's greatest entry is the first to evict: the smallest value, and
/// among equal values the latest to arrive.
struct Entry {
    val: Value,
    seq: u64,
    cmp: Arc<Comparator>,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cmp
            .compare(&other.val, &self.val)
            .then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Entry {}

/// The `limit` greatest values by key, emitted greatest first.
pub struct Top {
    parent: BoxPuller,
    limit: usize,
    keys: Vec<ExprEvaluator>,
    flush_every_batch: bool,
    cmp: Option<Arc<Comparator>>,
    heap: BinaryHeap<Entry>,
    seq: u64,
    eos: bool,
}

impl Top {
    /// Without keys the sort key is guessed from the first value.
    pub fn new(parent: BoxPuller, limit: usize, keys: Vec<ExprEvaluator>, flush_every_batch: bool) -> Self {
        Self {
            parent,
            limit: limit.max(1),
            keys,
            flush_every_batch,
            cmp: None,
            heap: BinaryHeap::new(),
            seq: 0,
            eos: false,
        }
    }

    fn consume(&mut self, val: &Value) {
        let cmp = self
            .cmp
            .get_or_insert_with(|| {
                let keys = if self.keys.is_empty() {
                    vec![dot_evaluator(guess_sort_key(val.typ()))]
                } else {
                    self.keys.clone()
                };
                Arc::new(Comparator::for_sort(keys, Order::Asc, false))
            })
            .clone();
        self.seq += 1;
        self.heap.push(Entry {
            val: val.keep(),
            seq: self.seq,
            cmp,
        });
        if self.heap.len() > self.limit {
            self.heap.pop();
        }
    }

    fn flush(&mut self) -> Option<Batch> {
        if self.heap.is_empty() {
            return None;
        }
        let heap = std::mem::take(&mut self.heap);
        Some(Batch::new(heap.into_sorted_vec().into_iter().map(|e| e.val).collect()))
    }
}

impl Puller for Top {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.eos {
            return Ok(None);
        }
        if done {
            self.eos = true;
            self.heap.clear();
            return self.parent.pull(true).map(|_| None);
        }
        while let Some(batch) = self.parent.pull(false)? {
            for val in batch.iter() {
                self.consume(val);
            }
            if self.flush_every_batch {
                if let Some(out) = self.flush() {
                    return Ok(Some(out));
                }
            }
        }
        self.eos = true;
        Ok(self.flush())
    }
}

#[cfg(test)]
mod tests {
    use strata_expr::path;
    use strata_value::{TypeContext, json};

    use super::*;
    use crate::{ValuesPuller, collect};

    fn records(ctx: &TypeContext, rows: &[(i64, &str)]) -> Vec<Value> {
        rows.iter()
            .map(|(n, s)| Value::record(ctx, [("n", Value::int64(*n)), ("s", Value::string(s))]).unwrap())
            .collect()
    }

    fn tags(vals: &[Value]) -> Vec<String> {
        vals.iter()
            .map(|v| v.field("s").unwrap().as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn keeps_the_greatest_and_emits_descending() {
        let ctx = TypeContext::new();
        let input = records(&ctx, &[(3, "a"), (9, "b"), (1, "c"), (9, "d"), (5, "e")]);
        let key = strata_expr::compile(&ctx, &path("n")).unwrap();
        let mut top = Top::new(Box::new(ValuesPuller::new(input, 2)), 3, vec![key], false);
        assert_eq!(tags(&collect(&mut top).unwrap()), vec!["b", "d", "e"]);
    }

    #[test]
    fn guesses_the_key_and_flushes_per_batch() {
        let ctx = TypeContext::new();
        let input = records(&ctx, &[(1, "a"), (2, "b"), (7, "c"), (4, "d")]);
        let mut top = Top::new(Box::new(ValuesPuller::new(input, 2)), 1, Vec::new(), true);
        let out = collect(&mut top).unwrap();
        assert_eq!(tags(&out), vec!["b", "c"]);
        assert_eq!(json::to_json(&out[1]).unwrap()["n"], 7);
    }
}
