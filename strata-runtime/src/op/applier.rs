//! Per-value operators: each input value becomes zero or more output values, in order.

use strata_error::StrataResult;
use strata_expr::ExprEvaluator;
use strata_value::walk::{Visit, walk};
use strata_value::{Column, PrimitiveType, Type, TypeContext, Value};

use crate::{Batch, BoxPuller, Puller};

pub trait Applier: Send {
    fn apply(&mut self, val: &Value, out: &mut Vec<Value>) -> StrataResult<()>;
}

/// Runs an [`Applier`] over every batch of its parent. Batches that come out empty are
/// skipped rather than passed on.
pub struct ApplierPuller<A> {
    parent: BoxPuller,
    applier: A,
}

impl<A: Applier> ApplierPuller<A> {
    pub fn new(parent: BoxPuller, applier: A) -> Self {
        Self { parent, applier }
    }
}

impl<A: Applier> Puller for ApplierPuller<A> {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        if done {
            return self.parent.pull(true);
        }
        while let Some(batch) = self.parent.pull(false)? {
            let mut out = Vec::with_capacity(batch.len());
            for val in batch.iter() {
                self.applier.apply(val, &mut out)?;
            }
            if !out.is_empty() {
                return Ok(Some(Batch::new(out)));
            }
        }
        Ok(None)
    }
}

/// Keeps the values for which the predicate is `true`. A predicate error is passed on in
/// place of the value; a missing result drops it.
#[derive(Debug)]
pub struct Filter {
    pred: ExprEvaluator,
}

impl Filter {
    pub fn new(pred: ExprEvaluator) -> Self {
        Self { pred }
    }
}

impl Applier for Filter {
    fn apply(&mut self, val: &Value, out: &mut Vec<Value>) -> StrataResult<()> {
        let res = self.pred.eval(val);
        if res.is_missing() || res.is_quiet() {
            return Ok(());
        }
        if res.is_error() {
            out.push(res);
        } else if res.is_true() {
            out.push(val.clone());
        }
        Ok(())
    }
}

/// Emits the result of each expression, skipping quiet and missing ones.
#[derive(Debug)]
pub struct Yield {
    exprs: Vec<ExprEvaluator>,
}

impl Yield {
    pub fn new(exprs: Vec<ExprEvaluator>) -> Self {
        Self { exprs }
    }
}

impl Applier for Yield {
    fn apply(&mut self, val: &Value, out: &mut Vec<Value>) -> StrataResult<()> {
        for e in &self.exprs {
            let res = e.eval(val);
            if !res.is_quiet() && !res.is_missing() {
                out.push(res);
            }
        }
        Ok(())
    }
}

/// Emits `{<as>: v}` for every non-null value `v` of the target type found anywhere inside
/// the results of its expressions.
#[derive(Debug)]
pub struct Explode {
    args: Vec<ExprEvaluator>,
    target: Type,
    out_type: Type,
}

impl Explode {
    pub fn new(
        ctx: &TypeContext,
        args: Vec<ExprEvaluator>,
        target: PrimitiveType,
        as_name: &str,
    ) -> StrataResult<Self> {
        let target = Type::primitive(target);
        let out_type = ctx.lookup_record(vec![Column::new(as_name, target.clone())])?;
        Ok(Self {
            args,
            target,
            out_type,
        })
    }
}

impl Applier for Explode {
    fn apply(&mut self, val: &Value, out: &mut Vec<Value>) -> StrataResult<()> {
        for arg in &self.args {
            let v = arg.eval(val);
            if v.is_missing() {
                continue;
            }
            let Some(bytes) = v.bytes() else {
                continue;
            };
            walk(v.typ(), v.body(), &mut |typ, body| {
                if *typ != self.target {
                    return Ok(Visit::Continue);
                }
                if let Some(body) = body {
                    let elem = Value::new(typ.clone(), Some(bytes.slice_ref(body)));
                    out.push(Value::record_of(self.out_type.clone(), &[elem])?);
                }
                Ok(Visit::SkipContainer)
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use strata_expr::{compile, eq, lit, path};
    use strata_value::json;

    use super::*;
    use crate::{ValuesPuller, collect};

    fn run(ctx: &TypeContext, applier: impl Applier + 'static, input: &[&str]) -> Vec<String> {
        let vals = input.iter().map(|s| json::parse(ctx, s).unwrap()).collect();
        let mut p = ApplierPuller::new(Box::new(ValuesPuller::new(vals, 2)), applier);
        collect(&mut p)
            .unwrap()
            .iter()
            .map(|v| json::to_json(v).unwrap().to_string())
            .collect()
    }

    #[test]
    fn filter_keeps_matches_and_passes_errors() {
        let ctx = TypeContext::new();
        let pred = compile(&ctx, &eq(path("a"), lit(1i64))).unwrap();
        let out = run(&ctx, Filter::new(pred), &[r#"{"a":1}"#, r#"{"a":2}"#, r#"{"b":1}"#, r#"{"a":1,"c":3}"#]);
        assert_eq!(out, vec![r#"{"a":1}"#, r#"{"a":1,"c":3}"#]);
    }

    #[test]
    fn yield_skips_missing() {
        let ctx = TypeContext::new();
        let exprs = vec![compile(&ctx, &path("a")).unwrap(), compile(&ctx, &path("b")).unwrap()];
        let out = run(&ctx, Yield::new(exprs), &[r#"{"a":1,"b":2}"#, r#"{"a":3}"#]);
        assert_eq!(out, vec!["1", "2", "3"]);
    }

    #[test]
    fn explode_finds_nested_values() {
        let ctx = TypeContext::new();
        let this = compile(&ctx, &strata_expr::this()).unwrap();
        let ex = Explode::new(&ctx, vec![this], PrimitiveType::Int64, "key").unwrap();
        let out = run(&ctx, ex, &[r#"{"a":1,"b":{"c":[2,3]},"s":"x"}"#]);
        assert_eq!(out, vec![r#"{"key":1}"#, r#"{"key":2}"#, r#"{"key":3}"#]);
    }
}
