//! Fan-out operators. One parent feeds several outputs through a shared router that
//! serialises access to the parent.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use strata_error::{ErrorKind, StrataError, StrataResult};
use strata_expr::ExprEvaluator;
use strata_value::Value;

use crate::{Batch, BoxPuller, Puller};

enum Route {
    /// Every output sees every value.
    Fork,
    /// Each batch goes to whichever output asked for it.
    Share,
    /// The first case whose predicate holds takes the value. `None` always holds.
    Predicate(Vec<Option<ExprEvaluator>>),
    /// The case whose value equals the key takes the value, else the default case.
    Key {
        key: ExprEvaluator,
        cases: Vec<Value>,
        default: Option<usize>,
    },
}

impl Route {
    fn split(&self, batch: &Batch, outputs: &[Output]) -> Vec<Vec<Value>> {
        let mut split: Vec<Vec<Value>> = vec![Vec::new(); outputs.len()];
        for val in batch.iter() {
            if let Some((i, val)) = self.choose(val) {
                if !outputs[i].done {
                    split[i].push(val);
                }
            }
        }
        split
    }

    fn choose(&self, val: &Value) -> Option<(usize, Value)> {
        match self {
            Route::Fork | Route::Share => None,
            Route::Predicate(cases) => cases.iter().enumerate().find_map(|(i, case)| {
                let Some(pred) = case else {
                    return Some((i, val.clone()));
                };
                let res = pred.eval(val);
                if res.is_error() && !res.is_missing() {
                    return Some((i, res));
                }
                res.is_true().then(|| (i, val.clone()))
            }),
            Route::Key { key, cases, default } => {
                let k = key.eval(val);
                cases
                    .iter()
                    .position(|c| *c == k)
                    .or(*default)
                    .map(|i| (i, val.clone()))
            }
        }
    }
}

/// Queued batches past which a lagging output is reported.
const QUEUE_WARN_BATCHES: usize = 1024;

#[derive(Default)]
struct Output {
    queue: VecDeque<Batch>,
    done: bool,
    warned: bool,
}

impl Output {
    fn push(&mut self, batch: Batch, idx: usize) {
        self.queue.push_back(batch);
        if !self.warned && self.queue.len() > QUEUE_WARN_BATCHES {
            self.warned = true;
            log::warn!(
                "router output {idx} has {} batches queued; its consumer is lagging",
                self.queue.len()
            );
        }
    }
}

/// Output queues are unbounded. Outputs are pulled from one thread in turn, so an output
/// that is not pulled while another drains the parent holds everything in between. Capping
/// the queue would stall that pattern, so a deep queue is logged instead.
struct Router {
    parent: BoxPuller,
    route: Route,
    outputs: Vec<Output>,
    failure: Option<(ErrorKind, String)>,
    eos: bool,
}

impl Router {
    fn pull(&mut self, idx: usize) -> StrataResult<Option<Batch>> {
        loop {
            if let Some(batch) = self.outputs[idx].queue.pop_front() {
                return Ok(Some(batch));
            }
            if let Some((kind, msg)) = &self.failure {
                self.outputs[idx].done = true;
                return Err(StrataError::new(*kind, msg.clone()));
            }
            if self.eos {
                return Ok(None);
            }
            match self.parent.pull(false) {
                Ok(Some(batch)) => self.dispatch(batch, idx),
                Ok(None) => self.eos = true,
                Err(err) => {
                    // Every output reports the failure.
                    self.eos = true;
                    self.failure = Some((err.kind(), err.to_string()));
                }
            }
        }
    }

    fn dispatch(&mut self, batch: Batch, idx: usize) {
        if matches!(self.route, Route::Share) {
            self.outputs[idx].push(batch, idx);
            return;
        }
        if matches!(self.route, Route::Fork) {
            for (i, out) in self.outputs.iter_mut().enumerate().filter(|(_, o)| !o.done) {
                out.push(batch.clone(), i);
            }
            return;
        }
        let split = self.route.split(&batch, &self.outputs);
        for (i, (out, vals)) in self.outputs.iter_mut().zip(split).enumerate() {
            if !vals.is_empty() {
                out.push(Batch::new(vals), i);
            }
        }
    }

    fn done(&mut self, idx: usize) -> StrataResult<()> {
        let out = &mut self.outputs[idx];
        out.done = true;
        out.queue.clear();
        if !self.eos && self.outputs.iter().all(|o| o.done) {
            self.eos = true;
            self.parent.pull(true)?;
        }
        Ok(())
    }
}

/// One output of a router.
struct RouterOutput {
    router: Arc<Mutex<Router>>,
    idx: usize,
    eos: bool,
}

impl Puller for RouterOutput {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.eos {
            return Ok(None);
        }
        let mut router = self.router.lock();
        if done {
            self.eos = true;
            router.done(self.idx)?;
            return Ok(None);
        }
        let res = router.pull(self.idx);
        if !matches!(res, Ok(Some(_))) {
            self.eos = true;
            router.outputs[self.idx].done = true;
        }
        res
    }
}

fn router(parent: BoxPuller, route: Route, n: usize) -> Arc<Mutex<Router>> {
    Arc::new(Mutex::new(Router {
        parent,
        route,
        outputs: (0..n).map(|_| Output::default()).collect(),
        failure: None,
        eos: false,
    }))
}

fn outputs(parent: BoxPuller, route: Route, n: usize) -> Vec<BoxPuller> {
    let router = router(parent, route, n);
    (0..n)
        .map(|idx| -> BoxPuller {
            Box::new(RouterOutput {
                router: router.clone(),
                idx,
                eos: false,
            })
        })
        .collect()
}

/// `n` outputs that each see the whole of `parent`.
pub fn fork(parent: BoxPuller, n: usize) -> Vec<BoxPuller> {
    outputs(parent, Route::Fork, n)
}

/// `n` outputs that split `parent` between them, each batch going to the output that pulled
/// it.
pub fn share(parent: BoxPuller, n: usize) -> Vec<BoxPuller> {
    outputs(parent, Route::Share, n)
}

/// One output per case. A value goes to the first case whose predicate is true; a predicate
/// that fails sends its error to that case. Unmatched values are dropped.
pub fn switch(parent: BoxPuller, cases: Vec<Option<ExprEvaluator>>) -> Vec<BoxPuller> {
    let n = cases.len();
    outputs(parent, Route::Predicate(cases), n)
}

/// One output per case, selected by equality of `key` with the case value. A `None` case
/// takes the values no other case matches.
pub fn expr_switch(parent: BoxPuller, key: ExprEvaluator, cases: Vec<Option<Value>>) -> Vec<BoxPuller> {
    let n = cases.len();
    let default = cases.iter().position(Option::is_none);
    // The default slot holds a value no key can equal.
    let cases = cases
        .into_iter()
        .map(|c| c.unwrap_or_else(|| Value::error("switch default")))
        .collect();
    outputs(parent, Route::Key { key, cases, default }, n)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use strata_expr::{compile, gt, lit, path};
    use strata_value::{TypeContext, json};

    use super::*;
    use crate::{ValuesPuller, collect};

    fn input(ctx: &TypeContext) -> BoxPuller {
        let vals = (1..=6)
            .map(|n| Value::record(ctx, [("n", Value::int64(n))]).unwrap())
            .collect();
        Box::new(ValuesPuller::new(vals, 4))
    }

    fn ns(vals: &[Value]) -> Vec<i64> {
        vals.iter().map(|v| v.field("n").unwrap().as_int().unwrap()).collect()
    }

    #[test]
    fn fork_replicates() {
        let ctx = TypeContext::new();
        let mut outs = fork(input(&ctx), 2);
        let a = collect(&mut outs[0]).unwrap();
        let b = collect(&mut outs[1]).unwrap();
        assert_eq!(ns(&a), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(ns(&a), ns(&b));
    }

    #[test]
    fn share_splits_batches_between_outputs() {
        let ctx = TypeContext::new();
        let vals = (1..=6)
            .map(|n| Value::record(&ctx, [("n", Value::int64(n))]).unwrap())
            .collect();
        let mut outs = share(Box::new(ValuesPuller::new(vals, 2)), 2);
        let a = outs[0].pull(false).unwrap().unwrap();
        let b = outs[1].pull(false).unwrap().unwrap();
        assert_eq!(ns(&a), vec![1, 2]);
        assert_eq!(ns(&b), vec![3, 4]);
        let mut rest = collect(&mut outs[1]).unwrap();
        rest.extend(collect(&mut outs[0]).unwrap());
        assert_eq!(ns(&rest), vec![5, 6]);
    }

    #[test]
    fn predicate_switch_takes_first_match() {
        let ctx = TypeContext::new();
        let cases = vec![
            Some(compile(&ctx, &gt(path("n"), lit(4i64))).unwrap()),
            Some(compile(&ctx, &gt(path("n"), lit(2i64))).unwrap()),
        ];
        let mut outs = switch(input(&ctx), cases);
        assert_eq!(ns(&collect(&mut outs[0]).unwrap()), vec![5, 6]);
        assert_eq!(ns(&collect(&mut outs[1]).unwrap()), vec![3, 4]);
    }

    #[test]
    fn predicate_errors_go_to_their_case() {
        let ctx = TypeContext::new();
        let vals = vec![json::parse(&ctx, r#"{"n":"x"}"#).unwrap(), json::parse(&ctx, r#"{"n":3}"#).unwrap()];
        let cases = vec![Some(compile(&ctx, &gt(path("n"), lit(1i64))).unwrap()), None];
        let mut outs = switch(Box::new(ValuesPuller::new(vals, 10)), cases);
        let first = collect(&mut outs[0]).unwrap();
        let rest = collect(&mut outs[1]).unwrap();
        assert_eq!(first.len() + rest.len(), 2);
        assert!(first.iter().chain(rest.iter()).any(|v| v.field("n").is_some_and(|n| n.as_int() == Some(3))));
    }

    #[test]
    fn expr_switch_routes_by_key() {
        let ctx = TypeContext::new();
        let key = compile(&ctx, &path("n")).unwrap();
        let mut outs = expr_switch(input(&ctx), key, vec![Some(Value::int64(2)), None, Some(Value::int64(5))]);
        assert_eq!(ns(&collect(&mut outs[0]).unwrap()), vec![2]);
        assert_eq!(ns(&collect(&mut outs[1]).unwrap()), vec![1, 3, 4, 6]);
        assert_eq!(ns(&collect(&mut outs[2]).unwrap()), vec![5]);
    }

    struct Watched {
        inner: BoxPuller,
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

    #[test]
    fn parent_is_done_when_every_output_is() {
        let ctx = TypeContext::new();
        let flag = Arc::new(AtomicBool::new(false));
        let parent = Watched {
            inner: input(&ctx),
            done: flag.clone(),
        };
        let mut outs = fork(Box::new(parent), 2);
        assert!(outs[0].pull(false).unwrap().is_some());
        outs[0].pull(true).unwrap();
        assert!(!flag.load(Ordering::SeqCst));
        outs[1].pull(true).unwrap();
        assert!(flag.load(Ordering::SeqCst));
        assert!(outs[1].pull(false).unwrap().is_none());
    }

    #[test]
    fn lagging_fork_output_keeps_everything_and_is_flagged() {
        let n = QUEUE_WARN_BATCHES + 10;
        let vals = (0..i64::try_from(n).unwrap()).map(Value::int64).collect();
        let router = router(Box::new(ValuesPuller::new(vals, 1)), Route::Fork, 2);
        let mut fast = RouterOutput {
            router: router.clone(),
            idx: 0,
            eos: false,
        };
        assert_eq!(collect(&mut fast).unwrap().len(), n);
        {
            let r = router.lock();
            assert_eq!(r.outputs[1].queue.len(), n);
            assert!(r.outputs[1].warned);
            assert!(!r.outputs[0].warned);
        }
        let mut slow = RouterOutput { router, idx: 1, eos: false };
        assert_eq!(collect(&mut slow).unwrap().len(), n);
    }
}
