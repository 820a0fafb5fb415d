//! Group-by aggregation.
//!
//! Groups are held in memory and emitted in the order they were first seen. With
//! `partials_out` each aggregate emits a state that another summarize with `partials_in`
//! can merge.

use std::cmp::Ordering;

use rustc_hash::FxHashMap;
use strata_error::{StrataResult, strata_err};
use strata_expr::{ExprEvaluator, Operator, arith, compare_values};
use strata_value::{FieldPath, TypeContext, Value};

use super::project::RecordBuilder;
use crate::plan::AggFunc;
use crate::{Batch, BoxPuller, Puller};

/// One compiled `lhs = func(expr) where filter`.
#[derive(Debug)]
pub struct Aggregate {
    pub lhs: FieldPath,
    pub func: AggFunc,
    pub expr: Option<ExprEvaluator>,
    pub filter: Option<ExprEvaluator>,
}

#[derive(Clone, Debug)]
enum AggState {
    Count(u64),
    Sum(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    Avg { sum: f64, count: u64 },
    Any(Option<Value>),
    First(Option<Value>),
    Last(Option<Value>),
    Collect(Vec<Value>),
}

fn keep_extreme(cur: &mut Option<Value>, val: &Value, want: Ordering) {
    match cur {
        None => *cur = Some(val.keep()),
        Some(existing) => {
            if compare_values(val, existing) == Some(want) {
                *cur = Some(val.keep());
            }
        }
    }
}

impl AggState {
    fn new(func: AggFunc) -> Self {
        match func {
            AggFunc::Count => AggState::Count(0),
            AggFunc::Sum => AggState::Sum(None),
            AggFunc::Min => AggState::Min(None),
            AggFunc::Max => AggState::Max(None),
            AggFunc::Avg => AggState::Avg { sum: 0.0, count: 0 },
            AggFunc::Any => AggState::Any(None),
            AggFunc::First => AggState::First(None),
            AggFunc::Last => AggState::Last(None),
            AggFunc::Collect => AggState::Collect(Vec::new()),
        }
    }

    /// Fold in one input value. `None` is a counted row with no argument.
    fn consume(&mut self, val: Option<&Value>) {
        let Some(val) = val else {
            if let AggState::Count(n) = self {
                *n += 1;
            }
            return;
        };
        if val.is_null() || val.is_missing() {
            return;
        }
        match self {
            AggState::Count(n) => *n += 1,
            AggState::Sum(cur) => {
                *cur = Some(match cur.take() {
                    None => val.keep(),
                    Some(acc) => arith(Operator::Add, &acc, val),
                })
            }
            AggState::Min(cur) => keep_extreme(cur, val, Ordering::Less),
            AggState::Max(cur) => keep_extreme(cur, val, Ordering::Greater),
            AggState::Avg { sum, count } => {
                if let Some(v) = as_f64(val) {
                    *sum += v;
                    *count += 1;
                }
            }
            AggState::Any(cur) | AggState::First(cur) => {
                if cur.is_none() {
                    *cur = Some(val.keep());
                }
            }
            AggState::Last(cur) => *cur = Some(val.keep()),
            AggState::Collect(vals) => vals.push(val.keep()),
        }
    }

    /// Fold in a partial state emitted by another summarize.
    fn merge(&mut self, partial: &Value) -> StrataResult<()> {
        if partial.is_null() || partial.is_missing() {
            return Ok(());
        }
        match self {
            AggState::Count(n) => {
                *n += partial
                    .as_uint()
                    .ok_or_else(|| strata_err!(Invalid: "count partial is not a count"))?;
            }
            AggState::Avg { sum, count } => {
                let s = partial.field("sum").as_ref().and_then(as_f64);
                let c = partial.field("count").and_then(|c| c.as_uint());
                let (Some(s), Some(c)) = (s, c) else {
                    return Err(strata_err!(Invalid: "avg partial must be {{sum,count}}"));
                };
                *sum += s;
                *count += c;
            }
            AggState::Collect(vals) => {
                vals.extend(partial.elements()?.iter().map(Value::keep));
            }
            _ => self.consume(Some(partial)),
        }
        Ok(())
    }

    fn result(&self, ctx: &TypeContext, partial: bool) -> StrataResult<Value> {
        let or_null = |v: &Option<Value>| v.clone().unwrap_or_else(Value::null);
        Ok(match self {
            AggState::Count(n) => Value::uint64(*n),
            AggState::Sum(v)
            | AggState::Min(v)
            | AggState::Max(v)
            | AggState::Any(v)
            | AggState::First(v)
            | AggState::Last(v) => or_null(v),
            AggState::Avg { sum, count } if partial => {
                Value::record(ctx, [("sum", Value::float64(*sum)), ("count", Value::uint64(*count))])?
            }
            AggState::Avg { count: 0, .. } => Value::null(),
            AggState::Avg { sum, count } => Value::float64(*sum / *count as f64),
            AggState::Collect(vals) if vals.is_empty() => Value::null(),
            AggState::Collect(vals) => Value::array_of(ctx, vals)?,
        })
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    v.as_float()
        .or_else(|| v.as_int().map(|i| i as f64))
        .or_else(|| v.as_uint().map(|u| u as f64))
}

/// Group-by keys and aggregates, one output record per group.
pub struct Summarize {
    parent: BoxPuller,
    ctx: TypeContext,
    keys: Vec<(FieldPath, ExprEvaluator)>,
    aggs: Vec<Aggregate>,
    partials_in: bool,
    partials_out: bool,
    groups: FxHashMap<Vec<Value>, usize>,
    order: Vec<(Vec<Value>, Vec<AggState>)>,
    builder: RecordBuilder,
    batch_size: usize,
    output: Option<std::vec::IntoIter<(Vec<Value>, Vec<AggState>)>>,
    eos: bool,
}

impl Summarize {
    pub fn new(
        parent: BoxPuller,
        ctx: &TypeContext,
        keys: Vec<(FieldPath, ExprEvaluator)>,
        aggs: Vec<Aggregate>,
        partials_in: bool,
        partials_out: bool,
        batch_size: usize,
    ) -> StrataResult<Self> {
        let paths: Vec<FieldPath> = keys
            .iter()
            .map(|(p, _)| p.clone())
            .chain(aggs.iter().map(|a| a.lhs.clone()))
            .collect();
        Ok(Self {
            parent,
            ctx: ctx.clone(),
            builder: RecordBuilder::new(ctx, &paths)?,
            keys,
            aggs,
            partials_in,
            partials_out,
            groups: FxHashMap::default(),
            order: Vec::new(),
            batch_size: batch_size.max(1),
            output: None,
            eos: false,
        })
    }

    fn consume(&mut self, val: &Value) -> StrataResult<()> {
        let mut key = Vec::with_capacity(self.keys.len());
        for (lhs, expr) in &self.keys {
            let k = if self.partials_in {
                val.deref(lhs).unwrap_or_else(Value::missing)
            } else {
                expr.eval(val)
            };
            if k.is_quiet() {
                return Ok(());
            }
            key.push(k.keep());
        }
        let idx = match self.groups.get(&key) {
            Some(idx) => *idx,
            None => {
                let states = self.aggs.iter().map(|a| AggState::new(a.func)).collect();
                self.order.push((key.clone(), states));
                self.groups.insert(key, self.order.len() - 1);
                self.order.len() - 1
            }
        };
        let states = &mut self.order[idx].1;
        for (agg, state) in self.aggs.iter().zip(states.iter_mut()) {
            if self.partials_in {
                if let Some(partial) = val.deref(&agg.lhs) {
                    state.merge(&partial)?;
                }
                continue;
            }
            if let Some(filter) = &agg.filter {
                if !filter.eval(val).is_true() {
                    continue;
                }
            }
            match &agg.expr {
                Some(expr) => state.consume(Some(&expr.eval(val))),
                None => state.consume(None),
            }
        }
        Ok(())
    }

    fn finish_input(&mut self) {
        if self.order.is_empty() && self.keys.is_empty() {
            // A global aggregate over no input still yields its one row.
            let states = self.aggs.iter().map(|a| AggState::new(a.func)).collect();
            self.order.push((Vec::new(), states));
        }
        self.groups.clear();
        self.output = Some(std::mem::take(&mut self.order).into_iter());
    }

    fn row(&mut self, key: Vec<Value>, states: &[AggState]) -> StrataResult<Option<Value>> {
        let mut vals: Vec<Option<Value>> = key.into_iter().map(Some).collect();
        for state in states {
            vals.push(Some(state.result(&self.ctx, self.partials_out)?));
        }
        self.builder.build(&vals)
    }
}

impl Puller for Summarize {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if self.eos {
            return Ok(None);
        }
        if done {
            self.eos = true;
            self.groups.clear();
            self.order.clear();
            self.output = None;
            return self.parent.pull(true).map(|_| None);
        }
        if self.output.is_none() {
            while let Some(batch) = self.parent.pull(false)? {
                for val in batch.iter() {
                    self.consume(val)?;
                }
            }
            self.finish_input();
        }
        let mut out = Vec::with_capacity(self.batch_size);
        while out.len() < self.batch_size {
            let Some((key, states)) = self.output.as_mut().and_then(Iterator::next) else {
                break;
            };
            if let Some(row) = self.row(key, &states)? {
                out.push(row);
            }
        }
        if out.is_empty() {
            self.eos = true;
            self.output = None;
            return Ok(None);
        }
        Ok(Some(Batch::new(out)))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use strata_expr::{compile, gt, lit, path};
    use strata_value::json;

    use super::*;
    use crate::{ValuesPuller, collect};

    fn input(ctx: &TypeContext) -> BoxPuller {
        let rows = [
            r#"{"g":"a","n":1}"#,
            r#"{"g":"b","n":5}"#,
            r#"{"g":"a","n":3}"#,
            r#"{"g":"a","n":null}"#,
            r#"{"g":"b","n":2}"#,
        ];
        let vals = rows.iter().map(|r| json::parse(ctx, r).unwrap()).collect();
        Box::new(ValuesPuller::new(vals, 2))
    }

    fn agg(ctx: &TypeContext, name: &str, func: AggFunc, arg: Option<&str>) -> Aggregate {
        Aggregate {
            lhs: FieldPath::from(name),
            func,
            expr: arg.map(|a| compile(ctx, &path(a)).unwrap()),
            filter: None,
        }
    }

    fn run(parent: BoxPuller, ctx: &TypeContext, aggs: Vec<Aggregate>, grouped: bool, partials: (bool, bool)) -> Vec<String> {
        let keys = if grouped {
            vec![(FieldPath::from("g"), compile(ctx, &path("g")).unwrap())]
        } else {
            Vec::new()
        };
        let mut s = Summarize::new(parent, ctx, keys, aggs, partials.0, partials.1, 10).unwrap();
        collect(&mut s)
            .unwrap()
            .iter()
            .map(|v| json::to_json(v).unwrap().to_string())
            .collect()
    }

    #[rstest]
    #[case::count(AggFunc::Count, None, vec![r#"{"g":"a","x":3}"#, r#"{"g":"b","x":2}"#])]
    #[case::count_arg(AggFunc::Count, Some("n"), vec![r#"{"g":"a","x":2}"#, r#"{"g":"b","x":2}"#])]
    #[case::sum(AggFunc::Sum, Some("n"), vec![r#"{"g":"a","x":4}"#, r#"{"g":"b","x":7}"#])]
    #[case::min(AggFunc::Min, Some("n"), vec![r#"{"g":"a","x":1}"#, r#"{"g":"b","x":2}"#])]
    #[case::max(AggFunc::Max, Some("n"), vec![r#"{"g":"a","x":3}"#, r#"{"g":"b","x":5}"#])]
    #[case::avg(AggFunc::Avg, Some("n"), vec![r#"{"g":"a","x":2.0}"#, r#"{"g":"b","x":3.5}"#])]
    #[case::first(AggFunc::First, Some("n"), vec![r#"{"g":"a","x":1}"#, r#"{"g":"b","x":5}"#])]
    #[case::last(AggFunc::Last, Some("n"), vec![r#"{"g":"a","x":3}"#, r#"{"g":"b","x":2}"#])]
    #[case::collect(AggFunc::Collect, Some("n"), vec![r#"{"g":"a","x":[1,3]}"#, r#"{"g":"b","x":[5,2]}"#])]
    fn grouped_aggregates(#[case] func: AggFunc, #[case] arg: Option<&str>, #[case] expected: Vec<&str>) {
        let ctx = TypeContext::new();
        let out = run(input(&ctx), &ctx, vec![agg(&ctx, "x", func, arg)], true, (false, false));
        assert_eq!(out, expected);
    }

    #[test]
    fn filtered_global_aggregate() {
        let ctx = TypeContext::new();
        let mut big = agg(&ctx, "big", AggFunc::Count, None);
        big.filter = Some(compile(&ctx, &gt(path("n"), lit(1i64))).unwrap());
        let out = run(input(&ctx), &ctx, vec![agg(&ctx, "count", AggFunc::Count, None), big], false, (false, false));
        assert_eq!(out, vec![r#"{"count":5,"big":3}"#]);
    }

    #[test]
    fn empty_global_aggregate_yields_one_row() {
        let ctx = TypeContext::new();
        let out = run(Box::new(ValuesPuller::new(Vec::new(), 1)), &ctx, vec![agg(&ctx, "count", AggFunc::Count, None)], false, (false, false));
        assert_eq!(out, vec![r#"{"count":0}"#]);
    }

    #[test]
    fn partials_merge_to_the_full_result() {
        let ctx = TypeContext::new();
        let aggs = |ctx: &TypeContext| {
            vec![
                agg(ctx, "avg", AggFunc::Avg, Some("n")),
                agg(ctx, "count", AggFunc::Count, None),
                agg(ctx, "all", AggFunc::Collect, Some("n")),
            ]
        };
        let keys = vec![(FieldPath::from("g"), compile(&ctx, &path("g")).unwrap())];
        let mut partial = Summarize::new(input(&ctx), &ctx, keys, aggs(&ctx), false, true, 1).unwrap();
        let partials = collect(&mut partial).unwrap();
        assert_eq!(
            json::to_json(&partials[0]).unwrap().to_string(),
            r#"{"g":"a","avg":{"sum":4.0,"count":2},"count":3,"all":[1,3]}"#
        );
        let out = run(Box::new(ValuesPuller::new(partials, 1)), &ctx, aggs(&ctx), true, (true, false));
        assert_eq!(
            out,
            vec![
                r#"{"g":"a","avg":2.0,"count":3,"all":[1,3]}"#,
                r#"{"g":"b","avg":3.5,"count":2,"all":[5,2]}"#,
            ]
        );
    }
}
