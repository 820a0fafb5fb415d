//! The external sort: values are buffered up to a memory limit, then spilled as sorted runs
//! and merged back.

use std::sync::Arc;

use strata_error::{StrataResult, strata_err};
use strata_expr::{Comparator, ExprEvaluator, dot_evaluator, guess_sort_key};
use strata_io::CancelToken;
use strata_value::{Order, Value};
use strata_zng::spill::{MergeReader, MergeSort};

use crate::{Batch, BoxPuller, Context, Puller};

enum Output {
    Memory(std::vec::IntoIter<Value>),
    Spilled(MergeReader),
}

pub struct Sort {
    parent: BoxPuller,
    ctx: Arc<Context>,
    keys: Vec<ExprEvaluator>,
    order: Order,
    nulls_first: bool,
    output: Option<Output>,
    eos: bool,
}

impl Sort {
    /// Without keys the sort key is guessed from the first value.
    pub fn new(
        parent: BoxPuller,
        ctx: Arc<Context>,
        keys: Vec<ExprEvaluator>,
        order: Order,
        nulls_first: bool,
    ) -> Self {
        Self {
            parent,
            ctx,
            keys,
            order,
            nulls_first,
            output: None,
            eos: false,
        }
    }

    fn comparator(&self, first: &Value) -> Comparator {
        let keys = if self.keys.is_empty() {
            vec![dot_evaluator(guess_sort_key(first.typ()))]
        } else {
            self.keys.clone()
        };
        Comparator::for_sort(keys, self.order, self.nulls_first)
    }

    /// Read the whole input, spilling whenever the buffer outgrows the memory limit.
    fn consume(&mut self) -> StrataResult<Option<Output>> {
        let mem_max = self.ctx.config.sort.mem_max_bytes;
        let mut buf: Vec<Value> = Vec::new();
        let mut bytes = 0;
        let mut cmp: Option<Comparator> = None;
        let mut spiller: Option<MergeSort> = None;
        while let Some(batch) = self.parent.pull(false)? {
            for val in batch.iter() {
                if cmp.is_none() {
                    cmp = Some(self.comparator(val));
                }
                bytes += val.size();
                buf.push(val.keep());
            }
            if bytes > mem_max {
                let Some(cmp) = &cmp else { continue };
                let spiller = match spiller.as_mut() {
                    Some(s) => s,
                    None => spiller.insert(MergeSort::new(
                        cmp.clone(),
                        self.ctx.zctx.clone(),
                        self.ctx.config.sort.temp_dir.as_deref(),
                    )?),
                };
                spiller.spill(std::mem::take(&mut buf))?;
                bytes = 0;
            }
        }
        let Some(cmp) = cmp else {
            return Ok(None);
        };
        match spiller {
            None => {
                let sorted = sort_cancellable(cmp, buf, &self.ctx.cancel)?;
                Ok(Some(Output::Memory(sorted.into_iter())))
            }
            Some(mut spiller) => {
                spiller.spill(buf)?;
                log::debug!("merging {} sorted runs", spiller.run_count());
                Ok(Some(Output::Spilled(spiller.merge()?)))
            }
        }
    }
}

/// Sort on a helper thread so a cancellation wakes the caller without waiting for the sort.
fn sort_cancellable(cmp: Comparator, mut vals: Vec<Value>, cancel: &CancelToken) -> StrataResult<Vec<Value>> {
    let (tx, rx) = flume::bounded(1);
    std::thread::Builder::new()
        .name("strata-sort".into())
        .spawn(move || {
            cmp.sort_stable(&mut vals);
            // The receiver is gone only if the query was cancelled.
            let _ = tx.send(vals);
        })?;
    flume::Selector::new()
        .recv(&rx, |res| res.map_err(|_| strata_err!("sort thread exited without a result")))
        .recv(cancel.receiver(), |_| Err(strata_err!(Cancelled: "query cancelled")))
        .wait()
}

impl Puller for Sort {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.eos {
            return Ok(None);
        }
        if done {
            self.eos = true;
            // Dropping a spilled output removes its run files.
            let consumed = self.output.take().is_some();
            if !consumed {
                self.parent.pull(true)?;
            }
            return Ok(None);
        }
        if self.output.is_none() {
            match self.consume()? {
                Some(out) => self.output = Some(out),
                None => {
                    self.eos = true;
                    return Ok(None);
                }
            }
        }
        let n = self.ctx.batch_size();
        let vals = match self.output.as_mut() {
            Some(Output::Memory(it)) => it.by_ref().take(n).collect(),
            Some(Output::Spilled(reader)) => reader.read_batch(n)?,
            None => Vec::new(),
        };
        if vals.is_empty() {
            self.eos = true;
            self.output = None;
            return Ok(None);
        }
        Ok(Some(Batch::new(vals)))
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;
    use strata_expr::{compile, path};
    use strata_value::TypeContext;

    use super::*;
    use crate::{QueryConfig, SortConfig, ValuesPuller, collect};

    fn context(mem_max_bytes: usize, temp_dir: &std::path::Path) -> Arc<Context> {
        Arc::new(Context::new(QueryConfig {
            sort: SortConfig {
                mem_max_bytes,
                temp_dir: Some(temp_dir.to_path_buf()),
            },
            ..Default::default()
        }))
    }

    fn keyed(ctx: &TypeContext, keys: &[u64]) -> Vec<Value> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| {
                Value::record(ctx, [("key", Value::uint64(*k)), ("i", Value::int64(i as i64))]).unwrap()
            })
            .collect()
    }

    #[test]
    fn empty_input_sorts_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(1024, dir.path());
        let mut sort = Sort::new(Box::new(ValuesPuller::new(Vec::new(), 10)), ctx, Vec::new(), Order::Asc, false);
        assert!(sort.pull(false).unwrap().is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn in_memory_sort_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(1 << 20, dir.path());
        let vals = keyed(&ctx.zctx, &[3, 1, 3, 2, 1]);
        let key = compile(&ctx.zctx, &path("key")).unwrap();
        let mut sort = Sort::new(Box::new(ValuesPuller::new(vals, 2)), ctx, vec![key], Order::Desc, false);
        let out: Vec<(u64, i64)> = collect(&mut sort)
            .unwrap()
            .iter()
            .map(|v| (v.field("key").unwrap().as_uint().unwrap(), v.field("i").unwrap().as_int().unwrap()))
            .collect();
        assert_eq!(out, vec![(3, 0), (3, 2), (2, 3), (1, 1), (1, 4)]);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn large_input_spills_and_merges() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(1024, dir.path());
        let mut rng = rand::rng();
        let keys: Vec<u64> = (0..10_000).map(|_| rng.random_range(0..1_000_000)).collect();
        let vals = keyed(&ctx.zctx, &keys);
        let key = compile(&ctx.zctx, &path("key")).unwrap();
        let mut sort = Sort::new(Box::new(ValuesPuller::new(vals, 100)), ctx, vec![key], Order::Asc, false);

        let first = sort.pull(false).unwrap().unwrap();
        let spill_dir = std::fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
        assert!(std::fs::read_dir(&spill_dir).unwrap().count() >= 1);

        let mut out: Vec<u64> = first.iter().map(|v| v.field("key").unwrap().as_uint().unwrap()).collect();
        out.extend(
            collect(&mut sort)
                .unwrap()
                .iter()
                .map(|v| v.field("key").unwrap().as_uint().unwrap()),
        );
        assert_eq!(out.len(), 10_000);
        assert!(out.windows(2).all(|w| w[0] <= w[1]));
        drop(sort);
        assert!(!spill_dir.exists());
    }
}
