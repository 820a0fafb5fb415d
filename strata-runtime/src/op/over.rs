use strata_error::StrataResult;
use strata_expr::{Expr, ExprEvaluator, compile};
use strata_value::Value;

use crate::builder::Builder;
use crate::plan::{Local, NodeId};
use crate::{Batch, BoxPuller, Puller, ValuesPuller, collect};

/// Runs a subquery per input value.
///
/// For each value the locals are evaluated and appended to the enclosing variables, then
/// `exprs` are evaluated and arrays and sets among the results are unnested. The body plan
/// is built fresh over those values with the new variables in scope, and its output becomes
/// this operator's output for that value.
pub struct Over {
    parent: BoxPuller,
    builder: Builder,
    exprs: Vec<ExprEvaluator>,
    locals: Vec<ExprEvaluator>,
    body: NodeId,
}

impl Over {
    pub fn new(
        parent: BoxPuller,
        builder: &Builder,
        exprs: &[Expr],
        locals: &[Local],
        body: NodeId,
    ) -> StrataResult<Self> {
        // Compiled unbound: each input value brings its own frame.
        let zctx = &builder.context().zctx;
        Ok(Self {
            parent,
            builder: builder.clone(),
            exprs: exprs.iter().map(|e| compile(zctx, e)).collect::<StrataResult<_>>()?,
            locals: locals.iter().map(|l| compile(zctx, &l.expr)).collect::<StrataResult<_>>()?,
            body,
        })
    }

    fn run(&self, val: &Value) -> StrataResult<Vec<Value>> {
        let mut vars = self.builder.vars().to_vec();
        for local in &self.locals {
            let v = local.eval_with(&vars, val);
            vars.push(v);
        }
        let mut input = Vec::new();
        for expr in &self.exprs {
            let v = expr.eval_with(&vars, val);
            if v.is_missing() || v.is_quiet() {
                continue;
            }
            if v.typ().inner().is_some() {
                input.extend(v.elements()?);
            } else {
                input.push(v);
            }
        }
        let batch_size = self.builder.context().batch_size();
        let scope = self.builder.with_vars(vars);
        let mut body = scope.build_one(self.body, vec![Box::new(ValuesPuller::new(input, batch_size))])?;
        collect(&mut body)
    }
}

impl Puller for Over {
    fn pull(&mut self, done: bool) -> StrataResult<Option<Batch>> {
        loop {
            let Some(batch) = self.parent.pull(done)? else {
                return Ok(None);
            };
            let mut out = Vec::new();
            for val in batch.iter() {
                out.extend(self.run(val)?);
            }
            if !out.is_empty() {
                return Ok(Some(Batch::new(out)));
            }
        }
    }
}
