//! Compiles a [`Plan`] into pullers.

use std::sync::Arc;

use strata_error::{StrataResult, strata_bail, strata_err};
use strata_expr::{Evaluator, Expr, ExprEvaluator, Folded, compile, evaluate_or_missing};
use strata_value::{FieldPath, Value};

use crate::guard::Guard;
use crate::op::{self, lhs_paths};
use crate::plan::{Case, NodeId, Op, Plan};
use crate::{BoxPuller, Context};

/// An evaluator with the variables of its scope already bound.
#[derive(Debug)]
struct Bound {
    inner: ExprEvaluator,
    vars: Arc<[Value]>,
}

impl Evaluator for Bound {
    fn eval_with(&self, _: &[Value], this: &Value) -> Value {
        self.inner.eval_with(&self.vars, this)
    }
}

/// Builds the operators of one plan. Every node reference is compiled into its own
/// operator, wrapped in a guard that checks the query's cancellation token.
#[derive(Clone)]
pub struct Builder {
    ctx: Arc<Context>,
    plan: Arc<Plan>,
    vars: Arc<[Value]>,
}

impl Builder {
    pub fn new(ctx: Arc<Context>, plan: Arc<Plan>) -> Self {
        Self {
            ctx,
            plan,
            vars: Arc::from(Vec::new()),
        }
    }

    /// A builder for a nested scope where `vars` are bound.
    pub fn with_vars(&self, vars: Vec<Value>) -> Self {
        Self {
            ctx: self.ctx.clone(),
            plan: self.plan.clone(),
            vars: vars.into(),
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn vars(&self) -> &[Value] {
        &self.vars
    }

    pub fn compile_expr(&self, expr: &Expr) -> StrataResult<ExprEvaluator> {
        let inner = compile(&self.ctx.zctx, expr)?;
        if self.vars.is_empty() {
            return Ok(inner);
        }
        Ok(Arc::new(Bound {
            inner,
            vars: self.vars.clone(),
        }))
    }

    fn compile_all(&self, exprs: &[Expr]) -> StrataResult<Vec<ExprEvaluator>> {
        exprs.iter().map(|e| self.compile_expr(e)).collect()
    }

    fn guard(&self, op: &Op, puller: BoxPuller) -> BoxPuller {
        Guard::wrap(puller, self.ctx.cancel.clone(), op.name())
    }

    fn combine(&self, parents: Vec<BoxPuller>) -> StrataResult<BoxPuller> {
        let mut parents = parents;
        if parents.len() == 1 {
            if let Some(p) = parents.pop() {
                return Ok(p);
            }
        }
        if parents.is_empty() {
            strata_bail!(Invalid: "nothing to combine");
        }
        let combined = op::Combine::new(parents, self.ctx.cancel.clone())?;
        Ok(self.guard(&Op::Combine, Box::new(combined)))
    }

    /// Build node `id` over `parents`, returning its outputs.
    pub fn build(&self, id: NodeId, parents: Vec<BoxPuller>) -> StrataResult<Vec<BoxPuller>> {
        let op = self.plan.node(id)?;
        match op {
            Op::Sequential { ops } => {
                let mut outs = parents;
                for id in ops {
                    outs = self.build(*id, outs)?;
                }
                Ok(outs)
            }
            Op::Parallel { branches, any } => self.build_branches(branches, parents, *any),
            Op::Fork { branches } => self.build_branches(branches, parents, false),
            Op::Switch { expr, cases } => self.build_switch(expr.as_ref(), cases, parents),
            Op::Join {
                style,
                left_key,
                right_key,
                args,
            } => {
                let [left, right]: [BoxPuller; 2] = match parents.try_into() {
                    Ok(pair) => pair,
                    Err(_) => strata_bail!(Invalid: "join needs exactly two inputs"),
                };
                let cutter = if args.is_empty() {
                    None
                } else {
                    let exprs = args.iter().map(|a| self.compile_expr(&a.rhs)).collect::<StrataResult<_>>()?;
                    Some(op::Cutter::new(&self.ctx.zctx, &lhs_paths(args), exprs, false)?)
                };
                let join = op::Join::new(
                    &self.ctx.zctx,
                    *style,
                    left,
                    right,
                    self.compile_expr(left_key)?,
                    self.compile_expr(right_key)?,
                    cutter,
                    self.ctx.batch_size(),
                );
                Ok(vec![self.guard(op, Box::new(join))])
            }
            Op::Merge { key, order } => {
                if parents.is_empty() {
                    strata_bail!(Invalid: "merge has no input");
                }
                let merge = op::Merge::new(
                    parents,
                    self.compile_expr(key)?,
                    *order,
                    self.ctx.cancel.clone(),
                    self.ctx.batch_size(),
                )?;
                Ok(vec![self.guard(op, Box::new(merge))])
            }
            Op::Combine => {
                if parents.is_empty() {
                    strata_bail!(Invalid: "combine has no input");
                }
                Ok(vec![self.combine(parents)?])
            }
            _ => {
                let input = if parents.is_empty() {
                    None
                } else {
                    Some(self.combine(parents)?)
                };
                Ok(vec![self.guard(op, self.build_op(op, input)?)])
            }
        }
    }

    /// Build node `id` and fan its outputs, if several, back into one.
    pub fn build_one(&self, id: NodeId, parents: Vec<BoxPuller>) -> StrataResult<BoxPuller> {
        let outs = self.build(id, parents)?;
        if outs.is_empty() {
            strata_bail!(Invalid: "plan node {id} has no output");
        }
        self.combine(outs)
    }

    fn build_branches(
        &self,
        branches: &[NodeId],
        parents: Vec<BoxPuller>,
        any: bool,
    ) -> StrataResult<Vec<BoxPuller>> {
        let inputs: Vec<Vec<BoxPuller>> = if parents.is_empty() {
            branches.iter().map(|_| Vec::new()).collect()
        } else if parents.len() == branches.len() && (parents.len() > 1 || !any) {
            parents.into_iter().map(|p| vec![p]).collect()
        } else {
            let parent = self.combine(parents)?;
            let outs = if any {
                op::share(parent, branches.len())
            } else {
                op::fork(parent, branches.len())
            };
            outs.into_iter().map(|p| vec![p]).collect()
        };
        let mut outs = Vec::new();
        for (id, input) in branches.iter().zip(inputs) {
            outs.extend(self.build(*id, input)?);
        }
        Ok(outs)
    }

    fn build_switch(
        &self,
        expr: Option<&Expr>,
        cases: &[Case],
        parents: Vec<BoxPuller>,
    ) -> StrataResult<Vec<BoxPuller>> {
        if parents.is_empty() {
            strata_bail!(Invalid: "switch has no input");
        }
        let parent = self.combine(parents)?;
        let outs = match expr {
            Some(key) => {
                let values = cases
                    .iter()
                    .map(|c| match &c.expr {
                        None => Ok(None),
                        Some(e) => match evaluate_or_missing(&self.ctx.zctx, e)? {
                            Folded::Value(v) => Ok(Some(v)),
                            Folded::Missing => Err(strata_err!(Invalid: "switch case is not a constant: {e}")),
                        },
                    })
                    .collect::<StrataResult<Vec<_>>>()?;
                op::expr_switch(parent, self.compile_expr(key)?, values)
            }
            None => {
                let preds = cases
                    .iter()
                    .map(|c| c.expr.as_ref().map(|e| self.compile_expr(e)).transpose())
                    .collect::<StrataResult<Vec<_>>>()?;
                op::switch(parent, preds)
            }
        };
        let mut built = Vec::new();
        for (case, out) in cases.iter().zip(outs) {
            built.extend(self.build(case.path, vec![out])?);
        }
        Ok(built)
    }

    /// Build a single-output operator. Scans take no input; everything else needs one.
    #[allow(clippy::cognitive_complexity)]
    fn build_op(&self, op: &Op, input: Option<BoxPuller>) -> StrataResult<BoxPuller> {
        let ctx = &self.ctx;
        let zctx = &ctx.zctx;
        let name = op.name();
        if is_source(op) {
            if input.is_some() {
                strata_bail!(Invalid: "{name} takes no input");
            }
            return match op {
                Op::FileScan { uri, filter } => op::file_scan(ctx, uri, filter.as_ref()),
                Op::HttpScan { url, filter } => op::http_scan(ctx, url, filter.as_ref()),
                Op::PoolScan { pool, span, filter } => op::pool_scan(ctx, pool, *span, filter.as_ref()),
                Op::Lister { pool, span } => op::lister(ctx, pool, *span),
                Op::MetaScan { meta, pool } => op::meta_scan(ctx, *meta, pool.as_deref()),
                Op::Deleter { pool, filter } => {
                    let deleter: BoxPuller = Box::new(op::Deleter::new(ctx, pool, filter)?);
                    Ok(deleter)
                }
                _ => strata_bail!("{name} is not a scan"),
            };
        }
        let Some(p) = input else {
            strata_bail!(Invalid: "{name} has no input");
        };
        let puller: BoxPuller = match op {
            Op::Filter { expr } => Box::new(op::ApplierPuller::new(p, op::Filter::new(self.compile_expr(expr)?))),
            Op::Cut { args } | Op::Pick { args } => {
                let exprs = args.iter().map(|a| self.compile_expr(&a.rhs)).collect::<StrataResult<_>>()?;
                let cutter = op::Cutter::new(zctx, &lhs_paths(args), exprs, matches!(op, Op::Pick { .. }))?;
                Box::new(op::ApplierPuller::new(p, cutter))
            }
            Op::Drop { fields } => Box::new(op::ApplierPuller::new(p, op::Dropper::new(zctx, fields)?)),
            Op::Put { args } => {
                let exprs = args.iter().map(|a| self.compile_expr(&a.rhs)).collect::<StrataResult<_>>()?;
                Box::new(op::ApplierPuller::new(p, op::Putter::new(zctx, &lhs_paths(args), exprs)?))
            }
            Op::Rename { args } => Box::new(op::ApplierPuller::new(p, op::Renamer::new(zctx, args)?)),
            Op::Sort {
                keys,
                order,
                nulls_first,
            } => Box::new(op::Sort::new(p, ctx.clone(), self.compile_all(keys)?, *order, *nulls_first)),
            Op::Head { limit } => Box::new(op::Head::new(p, *limit)),
            Op::Tail { limit } => Box::new(op::Tail::new(p, *limit)),
            Op::Top {
                limit,
                keys,
                flush_every_batch,
            } => Box::new(op::Top::new(p, *limit, self.compile_all(keys)?, *flush_every_batch)),
            Op::Uniq { cflag } => Box::new(op::Uniq::new(p, zctx, *cflag)),
            Op::Summarize {
                keys,
                aggs,
                partials_in,
                partials_out,
            } => {
                let keys = keys
                    .iter()
                    .map(|k| Ok((k.lhs.clone(), self.compile_expr(&k.rhs)?)))
                    .collect::<StrataResult<Vec<(FieldPath, ExprEvaluator)>>>()?;
                let aggs = aggs
                    .iter()
                    .map(|a| {
                        Ok(op::Aggregate {
                            lhs: a.lhs.clone(),
                            func: a.func,
                            expr: a.expr.as_ref().map(|e| self.compile_expr(e)).transpose()?,
                            filter: a.filter.as_ref().map(|e| self.compile_expr(e)).transpose()?,
                        })
                    })
                    .collect::<StrataResult<Vec<_>>>()?;
                Box::new(op::Summarize::new(
                    p,
                    zctx,
                    keys,
                    aggs,
                    *partials_in,
                    *partials_out,
                    ctx.batch_size(),
                )?)
            }
            Op::Fuse => Box::new(op::Fuse::new(p, zctx, ctx.batch_size())),
            Op::Shape => match &ctx.config.hook {
                Some(hook) => hook.shape(ctx, p)?,
                None => strata_bail!(Invalid: "shape is not available without a hook"),
            },
            Op::Explode { args, typ, as_name } => Box::new(op::ApplierPuller::new(
                p,
                op::Explode::new(zctx, self.compile_all(args)?, *typ, as_name)?,
            )),
            Op::Yield { exprs } => Box::new(op::ApplierPuller::new(p, op::Yield::new(self.compile_all(exprs)?))),
            Op::Over { exprs, locals, body } => Box::new(op::Over::new(p, self, exprs, locals, *body)?),
            Op::Pass => p,
            Op::Load { pool, branch } => Box::new(op::Load::new(p, ctx, pool, branch.as_deref())?),
            Op::SeqScan { pool, filter } => Box::new(op::SeqScan::new(p, ctx, pool, filter.as_ref())?),
            Op::Slicer { span } => Box::new(op::Slicer::new(p, zctx, *span)),
            _ => strata_bail!("{name} cannot be built here"),
        };
        Ok(puller)
    }
}

fn is_source(op: &Op) -> bool {
    matches!(
        op,
        Op::FileScan { .. }
            | Op::HttpScan { .. }
            | Op::PoolScan { .. }
            | Op::Lister { .. }
            | Op::MetaScan { .. }
            | Op::Deleter { .. }
    )
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use strata_error::ErrorKind;
    use strata_expr::{Assignment, gt, lit, path};
    use strata_value::{Order, json};

    use super::*;
    use crate::plan::{AggAssignment, AggFunc, JoinStyle};
    use crate::{ValuesPuller, collect};

    fn input(ctx: &Context, rows: &[&str]) -> BoxPuller {
        let vals = rows.iter().map(|r| json::parse(&ctx.zctx, r).unwrap()).collect();
        Box::new(ValuesPuller::new(vals, 2))
    }

    fn run(plan: Plan, parents: impl FnOnce(&Context) -> Vec<BoxPuller>) -> StrataResult<Vec<String>> {
        let ctx = Arc::new(Context::default());
        let plan = Arc::new(plan);
        let builder = Builder::new(ctx.clone(), plan.clone());
        let mut out = builder.build_one(plan.root, parents(&ctx))?;
        Ok(collect(&mut out)?
            .iter()
            .map(|v| json::to_json(v).unwrap().to_string())
            .collect())
    }

    const ROWS: [&str; 4] = [r#"{"n":3}"#, r#"{"n":1}"#, r#"{"n":4}"#, r#"{"n":2}"#];

    #[test]
    fn sequential_threads_values_through() {
        let plan = Plan::sequential([
            Op::Filter {
                expr: gt(path("n"), lit(1i64)),
            },
            Op::Sort {
                keys: vec![path("n")],
                order: Order::Desc,
                nulls_first: false,
            },
            Op::Head { limit: 2 },
        ]);
        let out = run(plan, |ctx| vec![input(ctx, &ROWS)]).unwrap();
        assert_eq!(out, vec![r#"{"n":4}"#, r#"{"n":3}"#]);
    }

    #[rstest]
    #[case::fork(false)]
    #[case::any(true)]
    fn parallel_branches_see_the_input(#[case] any: bool) {
        let mut plan = Plan::default();
        let a = plan.push(Op::Pass);
        let b = plan.push(Op::Pass);
        let par = plan.push(Op::Parallel { branches: vec![a, b], any });
        let sum = plan.push(Op::Summarize {
            keys: vec![],
            aggs: vec![AggAssignment {
                lhs: FieldPath::dotted("count"),
                func: AggFunc::Count,
                expr: None,
                filter: None,
            }],
            partials_in: false,
            partials_out: false,
        });
        plan.push(Op::Sequential { ops: vec![par, sum] });
        let out = run(plan, |ctx| vec![input(ctx, &ROWS)]).unwrap();
        let expected = if any { 4 } else { 8 };
        assert_eq!(out, vec![format!(r#"{{"count":{expected}}}"#)]);
    }

    #[test]
    fn expression_switch_needs_constant_cases() {
        let mut plan = Plan::default();
        let pass = plan.push(Op::Pass);
        plan.push(Op::Switch {
            expr: Some(path("n")),
            cases: vec![
                Case {
                    expr: Some(lit(1i64)),
                    path: pass,
                },
                Case {
                    expr: Some(path("m")),
                    path: pass,
                },
            ],
        });
        let err = run(plan, |ctx| vec![input(ctx, &ROWS)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn join_takes_two_parents() {
        let mut plan = Plan::default();
        plan.push(Op::Join {
            style: JoinStyle::Inner,
            left_key: path("n"),
            right_key: path("n"),
            args: vec![Assignment::new("m", path("m"))],
        });
        let out = run(plan.clone(), |ctx| {
            vec![
                input(ctx, &[r#"{"n":1}"#, r#"{"n":2}"#]),
                input(ctx, &[r#"{"n":2,"m":"x"}"#]),
            ]
        })
        .unwrap();
        assert_eq!(out, vec![r#"{"n":2,"m":"x"}"#]);

        let err = run(plan, |ctx| vec![input(ctx, &ROWS)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn inputs_must_match_the_operator() {
        let err = run(Plan::sequential([Op::Pass]), |_| vec![]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);

        let scan = Plan::sequential([Op::FileScan {
            uri: "/dev/null".into(),
            filter: None,
        }]);
        let err = run(scan, |ctx| vec![input(ctx, &ROWS)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);

        let err = run(Plan::sequential([Op::Shape]), |ctx| vec![input(ctx, &ROWS)]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }

    #[test]
    fn head_of_zero_takes_one() {
        let out = run(Plan::sequential([Op::Head { limit: 0 }]), |ctx| vec![input(ctx, &ROWS)]).unwrap();
        assert_eq!(out, vec![r#"{"n":3}"#]);
    }
}
