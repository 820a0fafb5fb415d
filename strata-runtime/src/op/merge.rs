//! Fan-in operators. Each parent is pulled on its own thread into a bounded channel so a slow
//! parent never blocks the others.

use std::thread::JoinHandle;

use flume::{Receiver, RecvError};
use strata_error::{StrataResult, strata_err};
use strata_expr::{Comparator, ExprEvaluator};
use strata_io::CancelToken;
use strata_value::{Order, Value};

use crate::{Batch, BoxPuller, Puller};

type Pulled = StrataResult<Option<Batch>>;

/// A thread pulling one parent until end of stream, an error, or the receiver is dropped.
struct Fetcher {
    rx: Option<Receiver<Pulled>>,
    handle: Option<JoinHandle<()>>,
}

impl Fetcher {
    fn spawn(mut parent: BoxPuller, name: &str) -> StrataResult<Self> {
        let (tx, rx) = flume::bounded::<Pulled>(1);
        let handle = std::thread::Builder::new().name(name.to_string()).spawn(move || {
            loop {
                let res = parent.pull(false);
                let last = !matches!(res, Ok(Some(_)));
                if tx.send(res).is_err() {
                    // The consumer went away: release the parent.
                    if let Err(err) = parent.pull(true) {
                        log::debug!("releasing fan-in parent: {err}");
                    }
                    return;
                }
                if last {
                    return;
                }
            }
        })?;
        Ok(Self {
            rx: Some(rx),
            handle: Some(handle),
        })
    }

    /// Disconnect and wait for the thread to release its parent.
    fn stop(&mut self) {
        self.rx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("fan-in fetcher thread panicked");
            }
        }
    }
}

impl Drop for Fetcher {
    fn drop(&mut self) {
        self.stop();
    }
}

enum Event {
    Received(usize, Result<Pulled, RecvError>),
    Cancelled,
}

/// Wait for the next result from any live fetcher, or for cancellation.
fn select(fetchers: &[Fetcher], cancel: &CancelToken) -> Event {
    let mut sel = flume::Selector::new().recv(cancel.receiver(), |_| Event::Cancelled);
    for (i, f) in fetchers.iter().enumerate() {
        if let Some(rx) = &f.rx {
            sel = sel.recv(rx, move |res| Event::Received(i, res));
        }
    }
    sel.wait()
}

fn receive(fetcher: &Fetcher, cancel: &CancelToken) -> StrataResult<Option<Batch>> {
    let Some(rx) = &fetcher.rx else {
        return Ok(None);
    };
    flume::Selector::new()
        .recv(rx, |res| res.map_err(|_| strata_err!("fan-in fetcher exited early")))
        .recv(cancel.receiver(), |_| Err(strata_err!(Cancelled: "query cancelled")))
        .wait()?
}

fn spawn_all(parents: Vec<BoxPuller>, name: &str) -> StrataResult<Vec<Fetcher>> {
    parents
        .into_iter()
        .enumerate()
        .map(|(i, p)| Fetcher::spawn(p, &format!("strata-{name}-{i}")))
        .collect()
}

/// Emits batches from all parents in whatever order they arrive.
pub struct Combine {
    fetchers: Vec<Fetcher>,
    cancel: CancelToken,
    next: usize,
    eos: bool,
}

impl Combine {
    pub fn new(parents: Vec<BoxPuller>, cancel: CancelToken) -> StrataResult<Self> {
        Ok(Self {
            fetchers: spawn_all(parents, "combine")?,
            cancel,
            next: 0,
            eos: false,
        })
    }

    fn live(&self) -> bool {
        self.fetchers.iter().any(|f| f.rx.is_some())
    }

    /// Take whatever is ready, starting after the last parent served.
    fn try_ready(&mut self) -> Option<(usize, Pulled)> {
        let n = self.fetchers.len();
        for k in 0..n {
            let i = (self.next + k) % n;
            let Some(rx) = &self.fetchers[i].rx else { continue };
            match rx.try_recv() {
                Ok(res) => return Some((i, res)),
                Err(flume::TryRecvError::Empty) => {}
                Err(flume::TryRecvError::Disconnected) => {
                    return Some((i, Err(strata_err!("fan-in fetcher exited early"))));
                }
            }
        }
        None
    }

    fn finish(&mut self) {
        self.eos = true;
        for f in &mut self.fetchers {
            f.stop();
        }
    }
}

impl Puller for Combine {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.eos {
            return Ok(None);
        }
        if done {
            self.finish();
            return Ok(None);
        }
        while self.live() {
            let (i, res) = match self.try_ready() {
                Some(ready) => ready,
                None => match select(&self.fetchers, &self.cancel) {
                    Event::Received(i, res) => {
                        (i, res.map_err(|_| strata_err!("fan-in fetcher exited early")).and_then(|r| r))
                    }
                    Event::Cancelled => {
                        self.finish();
                        return Err(strata_err!(Cancelled: "query cancelled"));
                    }
                },
            };
            self.next = i + 1;
            match res {
                Ok(Some(batch)) => return Ok(Some(batch)),
                Ok(None) => self.fetchers[i].stop(),
                Err(err) => {
                    self.finish();
                    return Err(err);
                }
            }
        }
        self.eos = true;
        Ok(None)
    }
}

/// The current batch of one merged parent.
struct Head {
    batch: Option<Batch>,
    pos: usize,
}

impl Head {
    fn peek(&self) -> Option<&Value> {
        self.batch.as_ref().and_then(|b| b.get(self.pos))
    }
}

/// K-way merge of parents that are each sorted by `key` in `order`.
pub struct Merge {
    fetchers: Vec<Fetcher>,
    heads: Vec<Head>,
    cmp: Comparator,
    cancel: CancelToken,
    batch_size: usize,
    primed: bool,
    eos: bool,
}

impl Merge {
    pub fn new(
        parents: Vec<BoxPuller>,
        key: ExprEvaluator,
        order: Order,
        cancel: CancelToken,
        batch_size: usize,
    ) -> StrataResult<Self> {
        let fetchers = spawn_all(parents, "merge")?;
        let heads = fetchers.iter().map(|_| Head { batch: None, pos: 0 }).collect();
        Ok(Self {
            fetchers,
            heads,
            cmp: Comparator::for_merge(key, order),
            cancel,
            batch_size: batch_size.max(1),
            primed: false,
            eos: false,
        })
    }

    /// Make sure parent `i` has a current value unless it is exhausted.
    fn refill(&mut self, i: usize) -> StrataResult<()> {
        while self.heads[i].peek().is_none() && self.fetchers[i].rx.is_some() {
            match receive(&self.fetchers[i], &self.cancel)? {
                Some(batch) => {
                    self.heads[i] = Head {
                        batch: Some(batch),
                        pos: 0,
                    }
                }
                None => {
                    self.heads[i].batch = None;
                    self.fetchers[i].stop();
                }
            }
        }
        Ok(())
    }

    fn winner(&self) -> Option<usize> {
        let mut best: Option<(usize, &Value)> = None;
        for (i, head) in self.heads.iter().enumerate() {
            let Some(val) = head.peek() else { continue };
            // Ties go to the lowest parent.
            if best.is_none_or(|(_, b)| self.cmp.compare(val, b).is_lt()) {
                best = Some((i, val));
            }
        }
        best.map(|(i, _)| i)
    }

    fn finish(&mut self) {
        self.eos = true;
        for f in &mut self.fetchers {
            f.stop();
        }
        for h in &mut self.heads {
            h.batch = None;
        }
    }

    fn merge_batch(&mut self) -> StrataResult<Vec<Value>> {
        if !self.primed {
            for i in 0..self.heads.len() {
                self.refill(i)?;
            }
            self.primed = true;
        }
        let mut out = Vec::with_capacity(self.batch_size);
        while out.len() < self.batch_size {
            let Some(i) = self.winner() else { break };
            if let Some(val) = self.heads[i].peek() {
                out.push(val.clone());
            }
            self.heads[i].pos += 1;
            self.refill(i)?;
        }
        Ok(out)
    }
}

impl Puller for Merge {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.eos {
            return Ok(None);
        }
        if done {
            self.finish();
            return Ok(None);
        }
        match self.merge_batch() {
            Ok(out) if out.is_empty() => {
                self.finish();
                Ok(None)
            }
            Ok(out) => Ok(Some(Batch::new(out))),
            Err(err) => {
                self.finish();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use strata_expr::{compile, path};
    use strata_value::TypeContext;

    use super::*;
    use crate::{ValuesPuller, collect};

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

    fn ints(vals: &[i64], batch: usize) -> BoxPuller {
        Box::new(ValuesPuller::new(vals.iter().copied().map(Value::int64).collect(), batch))
    }

    fn keyed(ctx: &TypeContext, keys: &[i64], batch: usize) -> BoxPuller {
        let vals = keys
            .iter()
            .map(|k| Value::record(ctx, [("k", Value::int64(*k))]).unwrap())
            .collect();
        Box::new(ValuesPuller::new(vals, batch))
    }

    #[test]
    fn combine_emits_everything() {
        let mut combine = Combine::new(vec![ints(&[1, 2, 3], 1), ints(&[4, 5], 2), ints(&[], 1)], CancelToken::new()).unwrap();
        let mut got: Vec<i64> = collect(&mut combine).unwrap().iter().map(|v| v.as_int().unwrap()).collect();
        got.sort_unstable();
        assert_eq!(got, vec![1, 2, 3, 4, 5]);
        assert!(combine.pull(false).unwrap().is_none());
    }

    #[test]
    fn combine_done_releases_parents() {
        let flags: Vec<Arc<AtomicBool>> = (0..2).map(|_| Arc::new(AtomicBool::new(false))).collect();
        let parents: Vec<BoxPuller> = flags
            .iter()
            .map(|f| -> BoxPuller {
                Box::new(Watched {
                    inner: ValuesPuller::new((0..100).map(Value::int64).collect(), 1),
                    done: f.clone(),
                })
            })
            .collect();
        let mut combine = Combine::new(parents, CancelToken::new()).unwrap();
        assert!(combine.pull(false).unwrap().is_some());
        assert!(combine.pull(true).unwrap().is_none());
        assert!(flags.iter().all(|f| f.load(Ordering::SeqCst)));
    }

    #[test]
    fn merge_orders_sorted_parents() {
        let ctx = TypeContext::new();
        let key = compile(&ctx, &path("k")).unwrap();
        let parents = vec![
            keyed(&ctx, &[1, 4, 7, 10], 2),
            keyed(&ctx, &[2, 5, 8], 1),
            keyed(&ctx, &[3, 6, 9, 11, 12], 3),
        ];
        let mut merge = Merge::new(parents, key, Order::Asc, CancelToken::new(), 4).unwrap();
        let got: Vec<i64> = collect(&mut merge)
            .unwrap()
            .iter()
            .map(|v| v.field("k").unwrap().as_int().unwrap())
            .collect();
        assert_eq!(got, (1..=12).collect::<Vec<_>>());
    }

    #[test]
    fn merge_descending() {
        let ctx = TypeContext::new();
        let key = compile(&ctx, &path("k")).unwrap();
        let parents = vec![keyed(&ctx, &[9, 5, 1], 2), keyed(&ctx, &[8, 5, 2], 2)];
        let mut merge = Merge::new(parents, key, Order::Desc, CancelToken::new(), 100).unwrap();
        let got: Vec<i64> = collect(&mut merge)
            .unwrap()
            .iter()
            .map(|v| v.field("k").unwrap().as_int().unwrap())
            .collect();
        assert_eq!(got, vec![9, 8, 5, 5, 2, 1]);
    }

    #[test]
    fn cancellation_interrupts_merge() {
        let ctx = TypeContext::new();
        let key = compile(&ctx, &path("k")).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut merge = Merge::new(vec![keyed(&ctx, &[1], 1)], key, Order::Asc, cancel, 10).unwrap();
        // Either the value was already buffered or the wait saw the cancellation.
        match merge.pull(false) {
            Ok(_) => {}
            Err(err) => assert!(err.is_cancelled()),
        }
    }
}
